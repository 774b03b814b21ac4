//! Chat command grammar.
//!
//! Direct rooms: `<serviceID> <descriptor> <service> <method>`.
//! Group rooms: `<botName> <serviceID> <descriptor> <service> <method>`.

use call_store::CallTarget;
use thiserror::Error;

const TARGET_TOKENS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Name the command addressed, absent in direct rooms.
    pub bot: Option<String>,
    pub target: CallTarget,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected} tokens, got {found}")]
    TokenCount { expected: usize, found: usize },

    #[error("addressed to {0}")]
    OtherBot(String),
}

pub fn parse_command(text: &str, is_direct: bool, bot_name: &str) -> Result<Command, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let expected = if is_direct { TARGET_TOKENS } else { TARGET_TOKENS + 1 };

    if tokens.len() != expected {
        return Err(ParseError::TokenCount {
            expected,
            found: tokens.len(),
        });
    }

    let (bot, rest) = if is_direct {
        (None, tokens.as_slice())
    } else {
        if tokens[0] != bot_name {
            return Err(ParseError::OtherBot(tokens[0].to_string()));
        }
        (Some(tokens[0].to_string()), &tokens[1..])
    };

    Ok(Command {
        bot,
        target: CallTarget {
            snet_id: rest[0].to_string(),
            descriptor: rest[1].to_string(),
            service: rest[2].to_string(),
            method: rest[3].to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_room_command() {
        let command = parse_command("mybot org1 v1 calc add", false, "mybot").unwrap();

        assert_eq!(command.bot.as_deref(), Some("mybot"));
        assert_eq!(
            command.target,
            CallTarget {
                snet_id: "org1".into(),
                descriptor: "v1".into(),
                service: "calc".into(),
                method: "add".into(),
            }
        );
    }

    #[test]
    fn test_direct_room_command() {
        let command = parse_command("  org1 v1   calc add ", true, "mybot").unwrap();

        assert!(command.bot.is_none());
        assert_eq!(command.target.method, "add");
    }

    #[test]
    fn test_direct_room_rejects_bot_prefix() {
        assert_eq!(
            parse_command("mybot org1 v1 calc add", true, "mybot"),
            Err(ParseError::TokenCount {
                expected: 4,
                found: 5
            })
        );
    }

    #[test]
    fn test_group_room_requires_name() {
        assert_eq!(
            parse_command("otherbot org1 v1 calc add", false, "mybot"),
            Err(ParseError::OtherBot("otherbot".into()))
        );
        assert!(parse_command("org1 v1 calc add", false, "mybot").is_err());
        assert!(parse_command("hello there", false, "mybot").is_err());
    }
}
