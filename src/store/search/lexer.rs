//! Tokenizer for the note-search query language (spec.md §4.4 "Lexical level"): tokens are
//! whitespace-separated except for quoted phrases, a leading `-` negates a token, and the
//! bare token `any:` switches the whole query to OR-mode (handled one level up, in
//! [`super::normalize`]).

use super::error::SearchError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawToken {
    pub negated: bool,
    pub body: String,
}

pub fn lex(input: &str) -> Result<Vec<RawToken>, SearchError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let negated = if chars.peek() == Some(&'-') {
            chars.next();
            true
        } else {
            false
        };

        let mut body = String::new();
        let mut in_quote = false;
        loop {
            match chars.peek() {
                None => break,
                Some('"') => {
                    in_quote = !in_quote;
                    chars.next();
                },
                Some(c) if c.is_whitespace() && !in_quote => break,
                Some(_) => body.push(chars.next().expect("peeked")),
            }
        }
        if in_quote {
            return Err(SearchError::new("unterminated quoted phrase", body));
        }
        if body.is_empty() {
            continue;
        }
        tokens.push(RawToken { negated, body });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        let tokens = lex("todo:true -todo:false").unwrap();
        assert_eq!(
            tokens,
            vec![
                RawToken { negated: false, body: "todo:true".into() },
                RawToken { negated: true, body: "todo:false".into() },
            ]
        );
    }

    #[test]
    fn keeps_quoted_phrase_as_one_token_with_spaces() {
        let tokens = lex(r#"notebook:"Test notebook #1""#).unwrap();
        assert_eq!(tokens, vec![RawToken { negated: false, body: "notebook:Test notebook #1".into() }]);
    }

    #[test]
    fn negated_quoted_phrase() {
        let tokens = lex(r#"-"exact phrase""#).unwrap();
        assert_eq!(tokens, vec![RawToken { negated: true, body: "exact phrase".into() }]);
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(lex(r#"notebook:"unterminated"#).is_err());
    }

    #[test]
    fn ignores_repeated_whitespace() {
        let tokens = lex("  tag:a    tag:b  ").unwrap();
        assert_eq!(tokens.len(), 2);
    }
}
