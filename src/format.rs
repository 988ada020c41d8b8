//! Normalization of a turn sequence and system message into the shape a
//! backend accepts.

use crate::api::{ContentPart, ImageInput, Role, Turn, TurnContent};

/// Where the system message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemMessagePolicy {
    /// As a leading `system` turn.
    #[default]
    Prepend,
    /// Outside the turn list, in a dedicated request field.
    SideChannel,
}

/// How strictly user/assistant alternation is enforced.
///
/// Only the relaxed policy exists: consecutive same-role turns are passed
/// through untouched and backends are expected to tolerate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleAlternation {
    #[default]
    Relaxed,
}

/// Formatter output: the turns to send plus the side-channel system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormattedConversation {
    pub turns: Vec<Turn>,
    /// Only set under [`SystemMessagePolicy::SideChannel`].
    pub system: Option<String>,
}

/// Per-backend message normalization. Works on copies; the caller's turns are
/// never modified.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFormatter {
    pub system_policy: SystemMessagePolicy,
    pub role_alternation: RoleAlternation,
    /// Flatten multimodal turns into text for backends without image input.
    pub text_only: bool,
}

impl MessageFormatter {
    pub fn new(system_policy: SystemMessagePolicy, text_only: bool) -> Self {
        Self {
            system_policy,
            role_alternation: RoleAlternation::Relaxed,
            text_only,
        }
    }

    /// Normalize `turns` and `system_message`.
    ///
    /// Empty system turns and system turns repeating `system_message` are
    /// dropped. Under [`SystemMessagePolicy::Prepend`] the system message
    /// becomes the first turn unless the caller already led with a system
    /// turn of their own. Under [`SystemMessagePolicy::SideChannel`] all
    /// system text is moved out of the turn list, the system message first.
    pub fn format(&self, turns: &[Turn], system_message: &str) -> FormattedConversation {
        let system_message = system_message.trim();
        let mut kept: Vec<Turn> = turns
            .iter()
            .filter(|turn| {
                turn.role != Role::System
                    || !(turn.is_empty() || turn.text().trim() == system_message)
            })
            .cloned()
            .collect();

        if self.text_only {
            for turn in &mut kept {
                flatten_to_text(turn);
            }
        }

        match self.system_policy {
            SystemMessagePolicy::Prepend => {
                let caller_led = kept.first().is_some_and(|t| t.role == Role::System);
                if !system_message.is_empty() && !caller_led {
                    kept.insert(0, Turn::system(system_message));
                }
                FormattedConversation {
                    turns: kept,
                    system: None,
                }
            }
            SystemMessagePolicy::SideChannel => {
                let mut system_parts: Vec<String> = Vec::new();
                if !system_message.is_empty() {
                    system_parts.push(system_message.to_string());
                }
                let (system_turns, rest): (Vec<Turn>, Vec<Turn>) =
                    kept.into_iter().partition(|t| t.role == Role::System);
                system_parts.extend(system_turns.iter().map(Turn::text));
                FormattedConversation {
                    turns: rest,
                    system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
                }
            }
        }
    }

    /// Like [`format`](Self::format), then append a trailing user turn made
    /// of a text part (the system message, which is the vision instruction)
    /// and the image part. The formatted history itself is left as is.
    pub fn format_vision(
        &self,
        turns: &[Turn],
        system_message: &str,
        image: &ImageInput,
    ) -> FormattedConversation {
        let mut formatted = Self {
            text_only: false,
            ..*self
        }
        .format(turns, system_message);

        formatted.turns.push(Turn {
            role: Role::User,
            content: TurnContent::Parts(vec![
                ContentPart::Text {
                    text: system_message.to_string(),
                },
                ContentPart::Image {
                    mime: image.mime.clone(),
                    base64: image.base64.clone(),
                },
            ]),
        });
        formatted
    }
}

fn flatten_to_text(turn: &mut Turn) {
    if turn.is_multimodal() {
        turn.content = TurnContent::Text(turn.text());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Vec<Turn> {
        vec![
            Turn::user("hi"),
            Turn::assistant("hello"),
            Turn::user("how are you?"),
        ]
    }

    #[test]
    fn prepend_inserts_single_system_turn() {
        let out = MessageFormatter::default().format(&convo(), "Be brief.");
        assert_eq!(out.turns.len(), 4);
        assert_eq!(out.turns[0], Turn::system("Be brief."));
        assert_eq!(out.turns[1..], convo()[..]);
        assert!(out.system.is_none());
    }

    #[test]
    fn prepend_does_not_duplicate_existing_system_turn() {
        let mut turns = vec![Turn::system("Be brief.")];
        turns.extend(convo());
        let out = MessageFormatter::default().format(&turns, "Be brief.");
        let systems = out.turns.iter().filter(|t| t.role == Role::System).count();
        assert_eq!(systems, 1);
        assert_eq!(out.turns[0], Turn::system("Be brief."));
    }

    #[test]
    fn prepend_respects_caller_led_system_turn() {
        let mut turns = vec![Turn::system("Caller prompt")];
        turns.extend(convo());
        let out = MessageFormatter::default().format(&turns, "Adapter prompt");
        assert_eq!(out.turns[0], Turn::system("Caller prompt"));
        assert_eq!(out.turns.len(), 4);
    }

    #[test]
    fn empty_system_turns_are_dropped() {
        let turns = vec![Turn::system("  "), Turn::user("x")];
        let out = MessageFormatter::default().format(&turns, "");
        assert_eq!(out.turns, vec![Turn::user("x")]);
    }

    #[test]
    fn side_channel_moves_system_text_out() {
        let mut turns = vec![Turn::system("extra rule")];
        turns.extend(convo());
        let formatter = MessageFormatter::new(SystemMessagePolicy::SideChannel, false);
        let out = formatter.format(&turns, "S");
        assert_eq!(out.turns, convo());
        assert_eq!(out.system.as_deref(), Some("S\n\nextra rule"));
    }

    #[test]
    fn side_channel_without_system_text_is_none() {
        let formatter = MessageFormatter::new(SystemMessagePolicy::SideChannel, false);
        assert!(formatter.format(&convo(), "").system.is_none());
    }

    #[test]
    fn consecutive_same_role_turns_pass_through() {
        let turns = vec![Turn::user("a"), Turn::user("b")];
        let out = MessageFormatter::default().format(&turns, "");
        assert_eq!(out.turns, turns);
    }

    #[test]
    fn text_only_flattens_parts() {
        let turns = vec![Turn {
            role: Role::User,
            content: TurnContent::Parts(vec![
                ContentPart::Text { text: "see".into() },
                ContentPart::Image {
                    mime: "image/png".into(),
                    base64: "AAAA".into(),
                },
            ]),
        }];
        let out = MessageFormatter::new(SystemMessagePolicy::Prepend, true).format(&turns, "");
        assert_eq!(out.turns, vec![Turn::user("see")]);
        assert!(turns[0].is_multimodal(), "caller's turns must be untouched");
    }

    #[test]
    fn vision_appends_text_and_image_turn() {
        let image = ImageInput {
            mime: "image/jpeg".into(),
            base64: "/9j/".into(),
        };
        let plain = MessageFormatter::default().format(&convo(), "S");
        let out = MessageFormatter::default().format_vision(&convo(), "S", &image);
        assert_eq!(out.turns.len(), plain.turns.len() + 1);
        assert_eq!(out.turns[..plain.turns.len()], plain.turns[..]);
        let last = out.turns.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(
            last.content,
            TurnContent::Parts(vec![
                ContentPart::Text { text: "S".into() },
                ContentPart::Image {
                    mime: "image/jpeg".into(),
                    base64: "/9j/".into()
                },
            ])
        );
    }

    #[test]
    fn vision_turn_after_assistant_keeps_text_part() {
        let image = ImageInput {
            mime: "image/png".into(),
            base64: "AAAA".into(),
        };
        let turns = vec![Turn::user("q"), Turn::assistant("a")];
        let out = MessageFormatter::default().format_vision(&turns, "", &image);
        assert_eq!(out.turns.len(), 3);
        assert_eq!(out.turns[1], Turn::assistant("a"));
        assert!(matches!(
            &out.turns[2].content,
            TurnContent::Parts(parts)
                if parts.len() == 2 && matches!(parts[0], ContentPart::Text { .. })
        ));
    }
}
