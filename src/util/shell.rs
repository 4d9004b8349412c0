//! Shell-style command-line splitting, shared by every action that accepts
//! a `Command=`/`Run=`-style option instead of a pre-split argv.

use crate::error::SystemDeployError;

/// Splits `command` the way POSIX shells split an unquoted word list:
/// whitespace-separated, with single/double quoting and backslash escapes
/// honored. Does not perform globbing, variable expansion, or pipelines.
pub fn split(command: &str) -> Result<Vec<String>, SystemDeployError> {
    shell_words::split(command).map_err(|e| SystemDeployError::Validation(format!("invalid shell command {command:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_words() {
        assert_eq!(split("echo hello world").unwrap(), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn honors_quoting() {
        assert_eq!(split("echo 'hello world'").unwrap(), vec!["echo", "hello world"]);
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(split("echo 'unterminated").is_err());
    }
}
