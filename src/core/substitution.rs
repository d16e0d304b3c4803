//! Placeholder substitution and speech-text cleanup for finished replies.
//!
//! Substitution runs once on the final text. Running it per streamed delta
//! would corrupt placeholders split across two chunks.

/// Replacements for the two placeholders character authors use.
#[derive(Debug, Clone, Copy)]
pub struct Names<'a> {
    pub user: &'a str,
    pub character: &'a str,
}

impl<'a> Names<'a> {
    pub fn new(user: &'a str, character: &'a str) -> Self {
        Self { user, character }
    }

    fn for_placeholder(&self, inner: &str) -> Option<&'a str> {
        let inner = inner.trim();
        if inner.eq_ignore_ascii_case("user") {
            Some(self.user)
        } else if inner.eq_ignore_ascii_case("char") {
            Some(self.character)
        } else {
            None
        }
    }
}

/// Replaces `{{user}}` / `{{char}}` (any ASCII case, optional inner
/// whitespace) and the `<USER>` / `<BOT>` aliases.
pub fn substitute_placeholders(text: &str, names: Names<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(['{', '<']) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];

        if let Some(after_open) = candidate.strip_prefix("{{") {
            if let Some(close) = after_open.find("}}") {
                if let Some(replacement) = names.for_placeholder(&after_open[..close]) {
                    out.push_str(replacement);
                    rest = &after_open[close + 2..];
                    continue;
                }
            }
        } else if let Some(after) = candidate.strip_prefix("<USER>") {
            out.push_str(names.user);
            rest = after;
            continue;
        } else if let Some(after) = candidate.strip_prefix("<BOT>") {
            out.push_str(names.character);
            rest = after;
            continue;
        }

        let ch_len = candidate.chars().next().map_or(1, char::len_utf8);
        out.push_str(&candidate[..ch_len]);
        rest = &candidate[ch_len..];
    }

    out.push_str(rest);
    out
}

/// Text suitable for speech: `*roleplay actions*` removed, whitespace
/// collapsed. An unmatched `*` is dropped on its own.
pub fn clean_for_speech(text: &str) -> String {
    let mut spoken = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('*') {
        spoken.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('*') {
            Some(end) => {
                spoken.push(' ');
                rest = &after[end + 1..];
            }
            None => {
                rest = after;
            }
        }
    }
    spoken.push_str(rest);

    spoken.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: Names<'static> = Names {
        user: "Kai",
        character: "Aria",
    };

    #[test]
    fn replaces_basic_placeholders() {
        assert_eq!(
            substitute_placeholders("{{char}} waves at {{user}}.", NAMES),
            "Aria waves at Kai."
        );
    }

    #[test]
    fn replaces_case_and_whitespace_variants() {
        assert_eq!(
            substitute_placeholders("{{User}}, {{ CHAR }} and {{uSeR}}", NAMES),
            "Kai, Aria and Kai"
        );
        assert_eq!(
            substitute_placeholders("<USER> meets <BOT>", NAMES),
            "Kai meets Aria"
        );
    }

    #[test]
    fn leaves_unknown_and_unterminated_braces() {
        assert_eq!(
            substitute_placeholders("{{mood}} {user} {{user", NAMES),
            "{{mood}} {user} {{user"
        );
        assert_eq!(substitute_placeholders("<b>hi</b>", NAMES), "<b>hi</b>");
    }

    #[test]
    fn handles_multibyte_text() {
        assert_eq!(
            substitute_placeholders("привет, {{user}} ✨{", NAMES),
            "привет, Kai ✨{"
        );
    }

    #[test]
    fn speech_cleanup_drops_actions() {
        assert_eq!(
            clean_for_speech("*smiles softly* Hello there!  *tilts head*\nHow are you?"),
            "Hello there! How are you?"
        );
    }

    #[test]
    fn speech_cleanup_drops_lone_asterisk() {
        assert_eq!(clean_for_speech("5 * 3 is fifteen"), "5 3 is fifteen");
        assert_eq!(clean_for_speech("plain"), "plain");
    }
}
