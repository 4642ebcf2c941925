//! launchd property-list rendering.

use service_platform::config::path_str;
use service_platform::{Config, Result, ServiceError};

/// Escape text for an XML element body.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// XML 1.0 cannot carry control characters other than tab, LF and CR.
fn check_xml(name: &str, field: &str, value: &str) -> Result<()> {
    match value
        .chars()
        .find(|&c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        Some(c) => Err(ServiceError::render(
            name,
            format!("{} contains control character {:?}", field, c),
        )),
        None => Ok(()),
    }
}

fn string_entry(out: &mut String, name: &str, key: &str, value: &str) -> Result<()> {
    check_xml(name, key, value)?;
    out.push_str(&format!("<key>{}</key><string>{}</string>\n", key, escape_xml(value)));
    Ok(())
}

fn array_string(value: &str) -> String {
    format!("\t<string>{}</string>\n", escape_xml(value))
}

/// Render the launchd job for `config`. Identical configs give identical bytes.
pub fn render(config: &Config) -> Result<String> {
    let name = config.name.as_str();
    let program = path_str(name, &config.program)?;

    let mut out = String::new();
    out.push_str(concat!(
        "<?xml version='1.0' encoding='UTF-8'?>\n",
        "<!DOCTYPE plist PUBLIC \"-//Apple Computer//DTD PLIST 1.0//EN\"\n",
        "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\" >\n",
        "<plist version='1.0'>\n",
        "<dict>\n",
    ));

    string_entry(&mut out, name, "Label", name)?;
    string_entry(&mut out, name, "Program", program)?;

    out.push_str("<key>ProgramArguments</key>\n<array>\n");
    out.push_str(&array_string(program));
    for (i, arg) in config.arguments.iter().enumerate() {
        check_xml(name, &format!("argument {}", i), arg)?;
        out.push_str(&array_string(arg));
    }
    out.push_str("</array>\n");

    if let Some(dir) = &config.working_directory {
        string_entry(&mut out, name, "WorkingDirectory", path_str(name, dir)?)?;
    }

    out.push_str(concat!(
        "<key>KeepAlive</key>\n",
        "<dict>\n",
        "\t<key>SuccessfulExit</key>\n",
        "\t<false/>\n",
        "</dict>\n",
        "<key>RunAtLoad</key><true/>\n",
        "<key>Disabled</key><false/>\n",
    ));

    if config.privileged {
        out.push_str(concat!(
            "<key>UserName</key><string>root</string>\n",
            "<key>GroupName</key><string>wheel</string>\n",
            "<key>InitGroups</key><true/>\n",
        ));
    }

    out.push_str("</dict>\n</plist>\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Config {
        Config::new("demo")
            .program("/usr/bin/demo")
            .args(["--flag", "va\"lue"])
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&'c\""), "a&lt;b&gt;&amp;&#39;c&#34;");
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn test_render_demo() {
        let plist = render(&demo()).unwrap();

        assert!(plist.contains("<key>Label</key><string>demo</string>"));
        assert!(plist.contains("<key>Program</key><string>/usr/bin/demo</string>"));
        assert!(plist.contains("\t<string>/usr/bin/demo</string>\n\t<string>--flag</string>\n"));
        assert!(plist.contains("<string>va&#34;lue</string>"));
        assert!(!plist.contains("va\"lue"));
        assert!(plist.contains("<key>RunAtLoad</key><true/>"));
        assert!(plist.contains("<key>Disabled</key><false/>"));
        assert!(plist.contains("<key>UserName</key><string>root</string>"));
        assert!(!plist.contains("WorkingDirectory"));
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(&demo()).unwrap(), render(&demo()).unwrap());
    }

    #[test]
    fn test_render_working_directory_and_user_agent() {
        let config = demo().working_directory("/var/lib/demo & co").privileged(false);
        let plist = render(&config).unwrap();
        assert!(plist.contains("<key>WorkingDirectory</key><string>/var/lib/demo &amp; co</string>"));
        assert!(!plist.contains("UserName"));
    }

    #[test]
    fn test_argument_change_changes_output() {
        let changed = demo().arg("--extra");
        assert_ne!(render(&demo()).unwrap(), render(&changed).unwrap());
    }

    #[test]
    fn test_control_characters_are_rejected() {
        let config = demo().arg("bell\u{7}");
        let err = render(&config).unwrap_err();
        assert!(matches!(err, ServiceError::Render { .. }));
        assert!(err.to_string().contains("argument 2"));
    }
}
