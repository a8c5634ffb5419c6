//! Class-selector namespacing for accessory stylesheets.
//!
//! Accessories are authored independently, so two of them may well both use
//! `.skin` or `.outline`. Before they can share one `<style>` block every
//! class they reference is rewritten with a per-accessory prefix.
//!
//! Rewriting walks `cssparser` tokens and copies the original source text
//! through untouched except for the class terms it replaces, so comments,
//! whitespace and declaration blocks survive byte for byte.
//!
//! # Example
//!
//! ```
//! use avatar_composer::namespace::namespace_selector;
//!
//! let namespaced = namespace_selector(".hat > .brim", "cap-").unwrap();
//! assert_eq!(namespaced.css, ".cap-hat > .cap-brim");
//! assert!(namespaced.classes.contains("brim"));
//! ```

use std::collections::BTreeSet;

use cssparser::{
    Delimiter, ParseError, Parser, ParserInput, SourcePosition, Token, serialize_identifier,
    serialize_string,
};

use crate::error::AvatarError;

type PResult<'i, T> = Result<T, ParseError<'i, ()>>;

/// At-rules whose block holds nested style rules rather than declarations.
const GROUPING_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document"];

// ============================================================================
// Namespaced
// ============================================================================

/// The output of a namespacing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespaced {
    /// The rewritten CSS text.
    pub css: String,

    /// Every class name the input referenced, before prefixing.
    pub classes: BTreeSet<String>,
}

impl Namespaced {
    fn unchanged(css: &str) -> Self {
        Self {
            css: css.to_string(),
            classes: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Prefixes every class term in a selector list.
///
/// Handles `.foo` as well as `[class~="foo"]` and `[class="foo bar"]`
/// attribute forms, including those nested in functional pseudo-classes such
/// as `:not(.foo)`.
pub fn namespace_selector(selector: &str, prefix: &str) -> Result<Namespaced, AvatarError> {
    if selector.trim().is_empty() {
        return Ok(Namespaced::unchanged(selector));
    }

    let mut input = ParserInput::new(selector);
    let mut parser = Parser::new(&mut input);
    let mut rewriter = Rewriter::new(prefix);
    rewriter
        .selector(&mut parser)
        .map_err(|_| AvatarError::parse(selector))?;
    Ok(rewriter.finish())
}

/// Prefixes every class term in every rule of a stylesheet.
///
/// Rules nested in grouping at-rules (`@media`, `@supports`, ...) are
/// rewritten too. Declaration blocks and other at-rules pass through as-is.
pub fn namespace_stylesheet(css: &str, prefix: &str) -> Result<Namespaced, AvatarError> {
    if css.trim().is_empty() {
        return Ok(Namespaced::unchanged(css));
    }

    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut rewriter = Rewriter::new(prefix);
    rewriter
        .rules(&mut parser)
        .map_err(|_| AvatarError::parse(css))?;
    Ok(rewriter.finish())
}

/// Prefixes the tokens of a `class` attribute that appear in `classes`.
///
/// Tokens outside the known set are left alone, so hand-authored utility
/// classes keep working.
///
/// ```
/// use std::collections::BTreeSet;
/// use avatar_composer::namespace::prefix_class_attribute;
///
/// let known: BTreeSet<String> = ["foo".into(), "bar".into()].into();
/// assert_eq!(prefix_class_attribute("foo bar baz", &known, "ns-"), "ns-foo ns-bar baz");
/// ```
pub fn prefix_class_attribute(value: &str, classes: &BTreeSet<String>, prefix: &str) -> String {
    value
        .split_whitespace()
        .map(|token| {
            if classes.contains(token) {
                format!("{prefix}{token}")
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Token Rewriter
// ============================================================================

struct Rewriter<'p> {
    prefix: &'p str,
    out: String,
    classes: BTreeSet<String>,
}

impl<'p> Rewriter<'p> {
    fn new(prefix: &'p str) -> Self {
        Self {
            prefix,
            out: String::new(),
            classes: BTreeSet::new(),
        }
    }

    fn finish(self) -> Namespaced {
        Namespaced {
            css: self.out,
            classes: self.classes,
        }
    }

    fn push_class(&mut self, name: &str) {
        self.classes.insert(name.to_string());
        self.out.push('.');
        // Writing into a String cannot fail.
        let _ = serialize_identifier(&format!("{}{}", self.prefix, name), &mut self.out);
    }

    /// Rewrites a selector list, returning the number of non-whitespace tokens.
    fn selector<'i, 't>(&mut self, parser: &mut Parser<'i, 't>) -> PResult<'i, usize> {
        let mut significant = 0;
        loop {
            let start = parser.position();
            let Some(token) = next_token(parser) else {
                return Ok(significant);
            };

            match token {
                Token::WhiteSpace(_) | Token::Comment(_) => {
                    self.out.push_str(parser.slice_from(start));
                    continue;
                }
                Token::Delim('.') => {
                    let name = match parser.next_including_whitespace().ok().cloned() {
                        Some(Token::Ident(name)) => name.to_string(),
                        _ => return Err(parser.new_custom_error(())),
                    };
                    self.push_class(&name);
                }
                Token::SquareBracketBlock => {
                    self.out.push('[');
                    parser.parse_nested_block(|nested| self.attribute_selector(nested))?;
                    expect_closed(parser, start, ']')?;
                    self.out.push(']');
                }
                Token::Function(_) | Token::ParenthesisBlock => {
                    self.out.push_str(parser.slice_from(start));
                    parser.parse_nested_block(|nested| self.selector(nested).map(|_| ()))?;
                    expect_closed(parser, start, ')')?;
                    self.out.push(')');
                }
                Token::CurlyBracketBlock
                | Token::Semicolon
                | Token::BadString(_)
                | Token::BadUrl(_)
                | Token::CloseParenthesis
                | Token::CloseSquareBracket
                | Token::CloseCurlyBracket => return Err(parser.new_custom_error(())),
                _ => self.out.push_str(parser.slice_from(start)),
            }
            significant += 1;
        }
    }

    /// Rewrites the inside of `[...]` when it tests the `class` attribute.
    fn attribute_selector<'i, 't>(&mut self, parser: &mut Parser<'i, 't>) -> PResult<'i, ()> {
        let start = parser.position();
        let mut tokens = Vec::new();
        while let Some(token) = next_token(parser) {
            match token {
                Token::WhiteSpace(_) | Token::Comment(_) => {}
                Token::BadString(_) | Token::BadUrl(_) => {
                    return Err(parser.new_custom_error(()));
                }
                token => tokens.push(token),
            }
        }

        match self.class_attribute(&tokens) {
            Some(rewritten) => self.out.push_str(&rewritten),
            None => self.out.push_str(parser.slice_from(start)),
        }
        Ok(())
    }

    fn class_attribute(&mut self, tokens: &[Token<'_>]) -> Option<String> {
        let [Token::Ident(name), operator, value, flags @ ..] = tokens else {
            return None;
        };
        if !name.eq_ignore_ascii_case("class") {
            return None;
        }
        let operator = match operator {
            Token::IncludeMatch => "~=",
            Token::Delim('=') => "=",
            _ => return None,
        };
        let value: &str = match value {
            Token::Ident(value) | Token::QuotedString(value) => &**value,
            _ => return None,
        };
        let flag: Option<&str> = match flags {
            [] => None,
            [Token::Ident(flag)] => Some(&**flag),
            _ => return None,
        };

        let prefixed = value
            .split_whitespace()
            .map(|class| {
                self.classes.insert(class.to_string());
                format!("{}{}", self.prefix, class)
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut out = format!("class{operator}");
        let _ = serialize_string(&prefixed, &mut out);
        if let Some(flag) = flag {
            out.push(' ');
            out.push_str(flag);
        }
        Some(out)
    }

    /// Rewrites a list of rules until the parser is exhausted.
    fn rules<'i, 't>(&mut self, parser: &mut Parser<'i, 't>) -> PResult<'i, ()> {
        loop {
            let state = parser.state();
            let start = parser.position();
            let Some(token) = next_token(parser) else {
                return Ok(());
            };

            match token {
                Token::WhiteSpace(_) | Token::Comment(_) | Token::CDO | Token::CDC => {
                    self.out.push_str(parser.slice_from(start));
                }
                Token::AtKeyword(name) => {
                    self.out.push_str(parser.slice_from(start));
                    self.at_rule(parser, &name)?;
                }
                Token::Semicolon
                | Token::BadString(_)
                | Token::BadUrl(_)
                | Token::CloseParenthesis
                | Token::CloseSquareBracket
                | Token::CloseCurlyBracket => return Err(parser.new_custom_error(())),
                _ => {
                    parser.reset(&state);
                    self.qualified_rule(parser)?;
                }
            }
        }
    }

    fn qualified_rule<'i, 't>(&mut self, parser: &mut Parser<'i, 't>) -> PResult<'i, ()> {
        let significant =
            parser.parse_until_before(Delimiter::CurlyBracketBlock, |prelude| {
                self.selector(prelude)
            })?;
        if significant == 0 {
            return Err(parser.new_custom_error(()));
        }

        let start = parser.position();
        match next_token(parser) {
            Some(Token::CurlyBracketBlock) => self.verbatim_block(parser, start, '}'),
            _ => Err(parser.new_custom_error(())),
        }
    }

    fn at_rule<'i, 't>(&mut self, parser: &mut Parser<'i, 't>, name: &str) -> PResult<'i, ()> {
        let grouping = GROUPING_AT_RULES
            .iter()
            .any(|rule| name.eq_ignore_ascii_case(rule));

        loop {
            let start = parser.position();
            let Some(token) = next_token(parser) else {
                return Ok(());
            };

            match token {
                Token::Semicolon => {
                    self.out.push(';');
                    return Ok(());
                }
                Token::CurlyBracketBlock if grouping => {
                    self.out.push('{');
                    parser.parse_nested_block(|nested| self.rules(nested))?;
                    expect_closed(parser, start, '}')?;
                    self.out.push('}');
                    return Ok(());
                }
                Token::CurlyBracketBlock => return self.verbatim_block(parser, start, '}'),
                Token::BadString(_)
                | Token::BadUrl(_)
                | Token::CloseParenthesis
                | Token::CloseSquareBracket
                | Token::CloseCurlyBracket => return Err(parser.new_custom_error(())),
                token => match closing_char(&token) {
                    Some(closer) => self.verbatim_block(parser, start, closer)?,
                    None => self.out.push_str(parser.slice_from(start)),
                },
            }
        }
    }

    /// Copies a block through unchanged after checking it is well formed.
    fn verbatim_block<'i, 't>(
        &mut self,
        parser: &mut Parser<'i, 't>,
        start: SourcePosition,
        closer: char,
    ) -> PResult<'i, ()> {
        parser.parse_nested_block(|nested| validate(nested))?;
        expect_closed(parser, start, closer)?;
        self.out.push_str(parser.slice_from(start));
        Ok(())
    }
}

// ============================================================================
// Token Helpers
// ============================================================================

fn next_token<'i>(parser: &mut Parser<'i, '_>) -> Option<Token<'i>> {
    parser.next_including_whitespace_and_comments().ok().cloned()
}

fn closing_char(token: &Token<'_>) -> Option<char> {
    match token {
        Token::Function(_) | Token::ParenthesisBlock => Some(')'),
        Token::SquareBracketBlock => Some(']'),
        Token::CurlyBracketBlock => Some('}'),
        _ => None,
    }
}

/// cssparser closes blocks implicitly at end of input; an unterminated block
/// is a syntax error here.
fn expect_closed<'i>(
    parser: &Parser<'i, '_>,
    start: SourcePosition,
    closer: char,
) -> PResult<'i, ()> {
    if parser.slice_from(start).ends_with(closer) {
        Ok(())
    } else {
        Err(parser.new_custom_error(()))
    }
}

fn validate<'i, 't>(parser: &mut Parser<'i, 't>) -> PResult<'i, ()> {
    loop {
        let start = parser.position();
        let Some(token) = next_token(parser) else {
            return Ok(());
        };

        match token {
            Token::BadString(_)
            | Token::BadUrl(_)
            | Token::CloseParenthesis
            | Token::CloseSquareBracket
            | Token::CloseCurlyBracket => return Err(parser.new_custom_error(())),
            token => {
                if let Some(closer) = closing_char(&token) {
                    parser.parse_nested_block(|nested| validate(nested))?;
                    expect_closed(parser, start, closer)?;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn prefixes_simple_class() {
        let result = namespace_selector(".foo", "ns-").unwrap();
        assert_eq!(result.css, ".ns-foo");
        assert_eq!(result.classes, known(&["foo"]));
    }

    #[test]
    fn reapplying_prefix_compounds() {
        let once = namespace_selector(".foo", "ns-").unwrap();
        let twice = namespace_selector(&once.css, "ns-").unwrap();
        assert_eq!(twice.css, ".ns-ns-foo");
        assert_eq!(twice.classes, known(&["ns-foo"]));
    }

    #[test]
    fn preserves_combinators_and_other_terms() {
        let result = namespace_selector("svg > g#hat.brim:hover, .a .b", "x-").unwrap();
        assert_eq!(result.css, "svg > g#hat.x-brim:hover, .x-a .x-b");
        assert_eq!(result.classes, known(&["a", "b", "brim"]));
    }

    #[test]
    fn rewrites_class_attribute_selectors() {
        let result = namespace_selector(r#"path[class~="fur"]"#, "ns-").unwrap();
        assert_eq!(result.css, r#"path[class~="ns-fur"]"#);

        let result = namespace_selector(r#"[class="a b"]"#, "ns-").unwrap();
        assert_eq!(result.css, r#"[class="ns-a ns-b"]"#);
        assert_eq!(result.classes, known(&["a", "b"]));
    }

    #[test]
    fn leaves_other_attribute_selectors_alone() {
        let result = namespace_selector(r#"[fill="red"]"#, "ns-").unwrap();
        assert_eq!(result.css, r#"[fill="red"]"#);
        assert!(result.classes.is_empty());
    }

    #[test]
    fn recurses_into_pseudo_class_functions() {
        let result = namespace_selector(".a:not(.b)", "ns-").unwrap();
        assert_eq!(result.css, ".ns-a:not(.ns-b)");
    }

    #[test]
    fn empty_input_is_a_no_op() {
        assert_eq!(namespace_selector("", "ns-").unwrap(), Namespaced::default());
        assert_eq!(namespace_stylesheet("  ", "ns-").unwrap().css, "  ");
    }

    #[test]
    fn invalid_selector_carries_original_text() {
        let err = namespace_selector(".", "ns-").unwrap_err();
        assert_eq!(err, AvatarError::Parse { css: ".".into() });

        assert!(namespace_selector("a { b", "ns-").is_err());
        assert!(namespace_selector("[class", "ns-").is_err());
    }

    #[test]
    fn stylesheet_rewrites_every_rule() {
        let css = ".skin{fill:#fc9}\n/* keep */ .eye, .pupil { fill: black }";
        let result = namespace_stylesheet(css, "face-").unwrap();
        assert_eq!(
            result.css,
            ".face-skin{fill:#fc9}\n/* keep */ .face-eye, .face-pupil { fill: black }"
        );
        assert_eq!(result.classes, known(&["eye", "pupil", "skin"]));
    }

    #[test]
    fn stylesheet_recurses_into_media_blocks() {
        let css = "@media (min-width: 10px) { .a { fill: red } }";
        let result = namespace_stylesheet(css, "ns-").unwrap();
        assert_eq!(result.css, "@media (min-width: 10px) { .ns-a { fill: red } }");
    }

    #[test]
    fn stylesheet_passes_other_at_rules_through() {
        let css = "@import url(x.css);\n@keyframes spin { from { opacity: 0 } }";
        let result = namespace_stylesheet(css, "ns-").unwrap();
        assert_eq!(result.css, css);
        assert!(result.classes.is_empty());
    }

    #[test]
    fn stylesheet_rejects_malformed_css() {
        for css in [
            ".a { fill: red",
            ".a",
            "}",
            ".a { fill: red } }",
            "{ fill: red }",
            ".a { content: \"unterminated\n }",
            ".a { background: url(a b) }",
            "@media print { .a { content: \"x\n } }",
        ] {
            let err = namespace_stylesheet(css, "ns-").unwrap_err();
            assert_eq!(err, AvatarError::Parse { css: css.into() }, "{css}");
        }
    }

    #[test]
    fn class_attribute_only_prefixes_known_tokens() {
        let classes = known(&["foo", "bar"]);
        assert_eq!(
            prefix_class_attribute("foo bar baz", &classes, "ns-"),
            "ns-foo ns-bar baz"
        );
        assert_eq!(prefix_class_attribute("", &classes, "ns-"), "");
        assert_eq!(prefix_class_attribute("  baz\tfoo ", &classes, "ns-"), "baz ns-foo");
    }
}
