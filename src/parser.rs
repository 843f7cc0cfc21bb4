//! Splitting the argument vector into directives.
//!
//! Every token that starts with `--` opens a new segment; the tokens up to
//! the next such token are its arguments. `--name=value` is the same as
//! `--name value`. Each segment decodes on its own, so one malformed
//! directive does not disturb the ones around it.
//!
//! Tokens that are not valid UTF-8 are never converted lossily: the
//! directive they belong to fails to decode instead.

use crate::directive::Directive;
use crate::error::{Error, Result};
use std::ffi::OsString;

/// The tokens of one directive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    name: String,
    args: Vec<String>,
    /// First token of this directive that is not valid UTF-8.
    not_unicode: Option<String>,
}

impl Segment {
    fn new(name: String, args: Vec<String>) -> Self {
        Self {
            name,
            args,
            not_unicode: None,
        }
    }

    fn decode(&self) -> Result<Directive> {
        if let Some(token) = &self.not_unicode {
            return Err(Error::NotUnicode {
                option: self.name.clone(),
                token: token.clone(),
            });
        }
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        Directive::decode(&self.name, &args)
    }
}

enum Item {
    Segment(Segment),
    Stray(String),
}

fn split_into_segments<I>(tokens: I) -> Vec<Item>
where
    I: IntoIterator<Item = OsString>,
{
    let mut items = Vec::new();
    for token in tokens {
        let token = match token.into_string() {
            Ok(token) => token,
            Err(raw) => {
                push_not_unicode(&mut items, raw);
                continue;
            }
        };
        if let Some(option) = token.strip_prefix("--") {
            let (name, inline) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (option, None),
            };
            items.push(Item::Segment(Segment::new(
                name.to_string(),
                inline.into_iter().collect(),
            )));
            continue;
        }
        match items.last_mut() {
            Some(Item::Segment(segment)) => segment.args.push(token),
            _ => items.push(Item::Stray(token)),
        }
    }
    items
}

fn push_not_unicode(items: &mut Vec<Item>, raw: OsString) {
    let shown = raw.to_string_lossy().into_owned();
    if raw.as_encoded_bytes().starts_with(b"--") {
        let mut segment = Segment::new(shown[2..].to_string(), Vec::new());
        segment.not_unicode = Some(shown);
        items.push(Item::Segment(segment));
        return;
    }
    match items.last_mut() {
        Some(Item::Segment(segment)) => {
            segment.not_unicode.get_or_insert(shown);
        }
        _ => items.push(Item::Stray(shown)),
    }
}

/// Decode the argument vector (without the program name) into the ordered
/// directive stream. Failures stay in place so that they are reported when
/// the interpreter reaches them.
pub fn parse<I, S>(args: I) -> Vec<Result<Directive>>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    split_into_segments(args.into_iter().map(Into::into))
        .into_iter()
        .map(|item| match item {
            Item::Segment(segment) => segment.decode(),
            Item::Stray(token) => Err(Error::StrayArgument(token)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AccessMode, Modifier};
    use std::path::PathBuf;

    #[test]
    fn test_parse_typical_stream() {
        let parsed = parse([
            "--rdonly", "in", "--creat", "--wronly", "out", "--command", "0", "1", "1", "cat",
            "-n", "--wait",
        ]);
        let parsed: Vec<Directive> = parsed.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            parsed,
            vec![
                Directive::Open {
                    access: AccessMode::ReadOnly,
                    path: PathBuf::from("in")
                },
                Directive::Modifier(Modifier::Creat),
                Directive::Open {
                    access: AccessMode::WriteOnly,
                    path: PathBuf::from("out")
                },
                Directive::Command {
                    tokens: ["0", "1", "1", "cat", "-n"].map(String::from).to_vec()
                },
                Directive::Wait,
            ]
        );
    }

    #[test]
    fn test_inline_value() {
        let parsed = parse(["--close=4", "--catch=15"]);
        assert_eq!(parsed[0].as_ref().unwrap(), &Directive::Close { index: 4 });
        assert_eq!(parsed[1].as_ref().unwrap().to_string(), "--catch 15");
    }

    #[test]
    fn test_errors_stay_in_sequence() {
        let parsed = parse(["stray", "--pipe", "--nonsense", "--close", "--wait"]);
        assert_eq!(parsed.len(), 5);
        assert!(matches!(parsed[0], Err(Error::StrayArgument(ref t)) if t == "stray"));
        assert_eq!(parsed[1].as_ref().unwrap(), &Directive::Pipe);
        assert!(matches!(parsed[2], Err(Error::UnknownOption(_))));
        assert!(matches!(parsed[3], Err(Error::Usage { .. })));
        assert_eq!(parsed[4].as_ref().unwrap(), &Directive::Wait);
    }

    #[test]
    fn test_command_without_arguments_still_decodes() {
        // too few tokens is reported when the directive runs
        let parsed = parse(["--command", "--wait"]);
        assert_eq!(
            parsed[0].as_ref().unwrap(),
            &Directive::Command { tokens: vec![] }
        );
    }

    #[test]
    fn test_non_utf8_token_fails_its_directive_only() {
        use std::os::unix::ffi::OsStringExt;

        let bad = OsString::from_vec(b"in\xff".to_vec());
        let parsed = parse([
            OsString::from("--rdonly"),
            bad,
            OsString::from("--pipe"),
            OsString::from_vec(b"--\xfe".to_vec()),
        ]);
        assert_eq!(parsed.len(), 3);
        assert!(matches!(
            &parsed[0],
            Err(Error::NotUnicode { option, token }) if option == "rdonly" && token == "in\u{FFFD}"
        ));
        assert_eq!(parsed[1].as_ref().unwrap(), &Directive::Pipe);
        assert!(matches!(parsed[2], Err(Error::NotUnicode { .. })));
    }

    #[test]
    fn test_empty_argv() {
        assert!(parse(Vec::<String>::new()).is_empty());
    }
}
