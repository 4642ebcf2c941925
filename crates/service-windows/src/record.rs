//! SCM configuration record: what the Service Control Manager stores for a
//! service, built from a [`Config`] and compared field by field.

use std::iter;

use service_platform::config::path_str;
use service_platform::{Config, Result, ServiceError};

pub const LOCAL_SYSTEM: &str = "LocalSystem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    Automatic,
    OnDemand,
    Disabled,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub display_name: String,
    pub description: String,
    pub start_type: StartType,
    pub account: String,
    pub program: String,
    pub arguments: Vec<String>,
}

impl ServiceRecord {
    /// Desired record for `config`: automatic start as LocalSystem.
    pub fn render(config: &Config) -> Result<Self> {
        let name = config.name.as_str();
        let program = path_str(name, &config.program)?;

        if program.contains('"') {
            return Err(ServiceError::render(name, "program path contains a double quote"));
        }
        for (field, value) in [
            ("program", program),
            ("display name", config.display_name()),
            ("description", config.description()),
        ] {
            if value.contains('\0') {
                return Err(ServiceError::render(name, format!("{} contains NUL", field)));
            }
        }
        if let Some(i) = config.arguments.iter().position(|a| a.contains('\0')) {
            return Err(ServiceError::render(name, format!("argument {} contains NUL", i)));
        }

        Ok(Self {
            display_name: config.display_name().to_string(),
            description: config.description().to_string(),
            start_type: StartType::Automatic,
            account: LOCAL_SYSTEM.to_string(),
            program: program.to_string(),
            arguments: config.arguments.clone(),
        })
    }

    /// Record as read back from the SCM. The description is not part of the
    /// queried configuration and is left empty.
    pub fn from_installed(
        display_name: String,
        start_type: StartType,
        account: Option<String>,
        command_line: &str,
    ) -> Self {
        let mut argv = split_command_line(command_line).into_iter();
        Self {
            display_name,
            description: String::new(),
            start_type,
            account: account.unwrap_or_default(),
            program: argv.next().unwrap_or_default(),
            arguments: argv.collect(),
        }
    }

    /// Quoted command line as registered with the SCM.
    pub fn command_line(&self) -> String {
        let mut line = format!("\"{}\"", self.program);
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }
}

/// Whether the installed record already matches the desired one.
pub fn records_match(desired: &ServiceRecord, installed: &ServiceRecord) -> bool {
    desired.display_name == installed.display_name
        && desired.start_type == installed.start_type
        && same_account(&desired.account, &installed.account)
        && desired.program.eq_ignore_ascii_case(&installed.program)
        && desired.arguments == installed.arguments
}

/// `LocalSystem`, `.\LocalSystem` and an unset account are the same identity.
pub fn same_account(a: &str, b: &str) -> bool {
    fn normalize(account: &str) -> &str {
        let account = account.strip_prefix(".\\").unwrap_or(account);
        if account.is_empty() {
            LOCAL_SYSTEM
        } else {
            account
        }
    }
    normalize(a).eq_ignore_ascii_case(normalize(b))
}

/// Quote one argument so `CommandLineToArgvW` yields it back unchanged.
/// Embedded quotes become `\"`; backslashes are doubled only where they
/// precede a quote.
pub fn quote_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            c => {
                out.extend(iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(iter::repeat('\\').take(backslashes * 2));
    out.push('"');
    out
}

/// Split a command line with the `CommandLineToArgvW` rules.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ') | Some('\t')) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut current = String::new();
        let mut in_quotes = false;
        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' if !in_quotes => break,
                '\\' => {
                    let mut count = 0;
                    while chars.peek() == Some(&'\\') {
                        chars.next();
                        count += 1;
                    }
                    if chars.peek() == Some(&'"') {
                        current.extend(iter::repeat('\\').take(count / 2));
                        if count % 2 == 1 {
                            current.push('"');
                            chars.next();
                        }
                    } else {
                        current.extend(iter::repeat('\\').take(count));
                    }
                }
                '"' => {
                    chars.next();
                    if in_quotes && chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = !in_quotes;
                    }
                }
                c => {
                    current.push(c);
                    chars.next();
                }
            }
        }
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Config {
        Config::new("demo")
            .program(r"C:\Program Files\Demo\demo.exe")
            .args(["--flag", "va\"lue"])
    }

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain"), r#""plain""#);
        assert_eq!(quote_arg("va\"lue"), r#""va\"lue""#);
        assert_eq!(quote_arg(r"C:\dir\"), r#""C:\dir\\""#);
        assert_eq!(quote_arg(""), r#""""#);
    }

    #[test]
    fn test_split_command_line() {
        assert_eq!(
            split_command_line(r#""C:\Program Files\demo.exe" "--flag" "va\"lue"  plain"#),
            vec![r"C:\Program Files\demo.exe", "--flag", "va\"lue", "plain"]
        );
        assert_eq!(split_command_line(r#"a\\\"b "c\\""#), vec![r#"a\"b"#, r"c\"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_command_line_splits_back_to_arguments() {
        let config = demo().args([r"trailing\", r#"a\"b"#, "", "with space"]);
        let record = ServiceRecord::render(&config).unwrap();

        let argv = split_command_line(&record.command_line());
        assert_eq!(argv[0], record.program);
        assert_eq!(&argv[1..], record.arguments.as_slice());
        assert!(record.command_line().contains(r#""va\"lue""#));
    }

    #[test]
    fn test_render_defaults() {
        let record = ServiceRecord::render(&demo()).unwrap();
        assert_eq!(record.display_name, "demo");
        assert_eq!(record.description, "demo");
        assert_eq!(record.start_type, StartType::Automatic);
        assert_eq!(record.account, LOCAL_SYSTEM);
        assert_eq!(ServiceRecord::render(&demo()).unwrap(), record);
    }

    #[test]
    fn test_installed_record_matches_desired() {
        let desired = ServiceRecord::render(&demo()).unwrap();
        let installed = ServiceRecord::from_installed(
            "demo".into(),
            StartType::Automatic,
            Some(r".\LocalSystem".into()),
            &desired.command_line().replace("Program Files", "PROGRAM FILES"),
        );
        assert!(records_match(&desired, &installed));
    }

    #[test]
    fn test_field_differences_are_detected() {
        let desired = ServiceRecord::render(&demo()).unwrap();
        let line = desired.command_line();

        let changed_args = ServiceRecord::render(&demo().arg("--verbose")).unwrap();
        assert!(!records_match(&changed_args, &desired));

        let manual = ServiceRecord::from_installed("demo".into(), StartType::OnDemand, None, &line);
        assert!(!records_match(&desired, &manual));

        let renamed = ServiceRecord::from_installed("Demo".into(), StartType::Automatic, None, &line);
        assert!(!records_match(&desired, &renamed));

        let other_user = ServiceRecord::from_installed(
            "demo".into(),
            StartType::Automatic,
            Some(r"NT AUTHORITY\LocalService".into()),
            &line,
        );
        assert!(!records_match(&desired, &other_user));
    }

    #[test]
    fn test_account_drift_converges_after_rewrite() {
        let desired = ServiceRecord::render(&demo()).unwrap();
        let line = desired.command_line();

        let drifted = ServiceRecord::from_installed(
            "demo".into(),
            StartType::Automatic,
            Some(r"NT AUTHORITY\LocalService".into()),
            &line,
        );
        assert!(!records_match(&desired, &drifted));

        // the account written on update is read back verbatim
        let rewritten = ServiceRecord::from_installed(
            "demo".into(),
            StartType::Automatic,
            Some(desired.account.clone()),
            &line,
        );
        assert!(records_match(&desired, &rewritten));
    }

    #[test]
    fn test_same_account() {
        assert!(same_account("LocalSystem", r".\LocalSystem"));
        assert!(same_account("localsystem", ""));
        assert!(!same_account("LocalSystem", r"NT AUTHORITY\NetworkService"));
    }

    #[test]
    fn test_render_rejects_nul() {
        assert!(ServiceRecord::render(&demo().arg("a\0")).is_err());
        assert!(ServiceRecord::render(&Config::new("demo").program("C:\\a\"b.exe")).is_err());
    }
}
