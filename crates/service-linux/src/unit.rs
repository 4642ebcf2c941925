//! systemd unit-file rendering.

use service_platform::config::path_str;
use service_platform::{Config, Result, ServiceError};

/// Quote one `ExecStart=` word. Backslash, quote and control characters are
/// C-escaped; `%` and `$` are doubled so systemd does not expand them.
pub fn quote_exec_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '%' => out.push_str("%%"),
            '$' => out.push_str("$$"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Escape a single-line setting value (`Description=`, paths).
pub fn escape_value(value: &str) -> String {
    value.replace('%', "%%")
}

fn check_value(name: &str, field: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(ServiceError::render(name, format!("{} contains NUL", field)));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(ServiceError::render(name, format!("{} must be a single line", field)));
    }
    // systemd reads a trailing backslash as a line continuation
    if value.ends_with('\\') {
        return Err(ServiceError::render(
            name,
            format!("{} must not end with a backslash", field),
        ));
    }
    Ok(())
}

/// Render the unit for `config`. Identical configs give identical bytes.
pub fn render(config: &Config) -> Result<String> {
    let name = config.name.as_str();
    let program = path_str(name, &config.program)?;
    check_value(name, "program", program)?;
    check_value(name, "description", config.description())?;

    let mut exec_start = quote_exec_arg(program);
    for (i, arg) in config.arguments.iter().enumerate() {
        if arg.contains('\0') {
            return Err(ServiceError::render(name, format!("argument {} contains NUL", i)));
        }
        exec_start.push(' ');
        exec_start.push_str(&quote_exec_arg(arg));
    }

    let working_dir = match &config.working_directory {
        Some(dir) => {
            let dir = path_str(name, dir)?;
            check_value(name, "working directory", dir)?;
            format!("WorkingDirectory={}\n", escape_value(dir))
        }
        None => String::new(),
    };

    let wanted_by = if config.privileged {
        "multi-user.target"
    } else {
        "default.target"
    };

    Ok(format!(
        r#"[Unit]
Description={description}
ConditionFileIsExecutable={program}

[Service]
ExecStart={exec_start}
{working_dir}Restart=on-failure
RestartSec=5

[Install]
WantedBy={wanted_by}
"#,
        description = escape_value(config.description()),
        program = escape_value(program),
        exec_start = exec_start,
        working_dir = working_dir,
        wanted_by = wanted_by,
    ))
}
