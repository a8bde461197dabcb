//! Shell-like splitting of a command line override

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split `line` into a program and its arguments.
///
/// Arguments are separated by unquoted whitespace. Single quotes keep
/// everything literally; double quotes group but honor `\"` and `\\`;
/// outside quotes a backslash escapes the next character.
pub fn split_shell_args(line: &str) -> Result<(String, Vec<String>)> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Quote::None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (Quote::None, '\'') => {
                quote = Quote::Single;
                in_word = true;
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                in_word = true;
            }
            (Quote::None, '\\') => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| Error::ShellArgs("trailing backslash".to_string()))?;
                current.push(escaped);
                in_word = true;
            }
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::Double, '\\') => match chars.next() {
                Some(escaped @ ('"' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => return Err(Error::ShellArgs("unterminated double quote".to_string())),
            },
            (_, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    match quote {
        Quote::Single => return Err(Error::ShellArgs("unterminated single quote".to_string())),
        Quote::Double => return Err(Error::ShellArgs("unterminated double quote".to_string())),
        Quote::None => {}
    }
    if in_word {
        words.push(current);
    }

    let mut words = words.into_iter();
    let program = words
        .next()
        .ok_or_else(|| Error::ShellArgs("command line is empty".to_string()))?;
    Ok((program, words.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("rclone serve restic --stdin b2:bucket", "rclone", &["serve", "restic", "--stdin", "b2:bucket"])]
    #[case("  rclone   -v  ", "rclone", &["-v"])]
    #[case("'/opt/my tools/rclone' serve", "/opt/my tools/rclone", &["serve"])]
    #[case(r#"ssh host "rclone serve restic --stdin""#, "ssh", &["host", "rclone serve restic --stdin"])]
    #[case(r#"cmd "a \"quoted\" word" 'it''s'"#, "cmd", &["a \"quoted\" word", "its"])]
    #[case(r"cmd with\ space", "cmd", &["with space"])]
    #[case(r#"cmd "" ''"#, "cmd", &["", ""])]
    #[case(r#"cmd "c:\path""#, "cmd", &[r"c:\path"])]
    fn test_split(#[case] line: &str, #[case] program: &str, #[case] args: &[&str]) {
        let (got_program, got_args) = split_shell_args(line).unwrap();
        assert_eq!(got_program, program);
        assert_eq!(got_args, args);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("rclone 'serve")]
    #[case("rclone \"serve")]
    #[case("rclone serve\\")]
    fn test_split_rejects(#[case] line: &str) {
        assert!(matches!(split_shell_args(line), Err(Error::ShellArgs(_))));
    }
}
