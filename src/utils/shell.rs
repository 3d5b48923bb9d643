//! Shell escaping and quoting utilities.

/// Characters that force an argument into single quotes.
const SHELL_META: &[char] = &[
    ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}', '<',
    '>', '|', '&', ';', '#', '~',
];

/// Replace `'` with `'\''` (end quote, escaped quote, start quote).
fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for `sh -c`.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Render a program and its arguments the way a user would type them.
pub fn display_command(program: &[String], command: &str) -> String {
    program
        .iter()
        .map(|part| quote_arg(part))
        .chain(std::iter::once(quote_arg(command)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_resource_names_are_unquoted() {
        assert_eq!(quote_arg("e2e-cluster-20190221"), "e2e-cluster-20190221");
    }

    #[test]
    fn metacharacters_are_quoted() {
        assert_eq!(quote_arg("a b"), "'a b'");
        assert_eq!(quote_arg("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn display_command_quotes_the_script() {
        let shell = vec!["sh".to_string(), "-c".to_string()];
        assert_eq!(display_command(&shell, "nox -s lint"), "sh -c 'nox -s lint'");
    }
}
