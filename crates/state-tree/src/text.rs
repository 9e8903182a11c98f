use crate::{Node, Result, TreeError, Value};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    ArrayOpen,
    ArrayClose,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> TreeError {
        TreeError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                c if c.is_whitespace() || c == ';' || c == ',' || c == '=' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '{' => {
                    self.bump();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.bump();
                    return Ok(Some(Token::Close));
                }
                '[' => {
                    self.bump();
                    return Ok(Some(Token::ArrayOpen));
                }
                ']' => {
                    self.bump();
                    return Ok(Some(Token::ArrayClose));
                }
                '\'' | '"' => {
                    self.bump();
                    return self.quoted(c).map(|s| Some(Token::Quoted(s)));
                }
                _ => return Ok(Some(Token::Word(self.word()))),
            }
        }
    }

    fn quoted(&mut self, delim: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == delim => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || is_delimiter(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | ';' | ',' | '=' | '#' | '\'' | '"')
}

/// Decimal or `0x` hex integer with an optional leading sign. Anything that
/// does not fit an `i64` stays a string.
fn parse_integer(word: &str) -> Option<i64> {
    let (neg, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.strip_prefix('+').unwrap_or(word)),
    };
    let hex = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"));
    let Some(hex) = hex else {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return word.parse::<i64>().ok();
    };
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let magnitude = i128::from(u64::from_str_radix(hex, 16).ok()?);
    i64::try_from(if neg { -magnitude } else { magnitude }).ok()
}

fn leaf(id: &str, token: Token) -> Node {
    match token {
        Token::Word(w) => match parse_integer(&w) {
            Some(v) => Node::integer(id, v),
            None => Node::string(id, w),
        },
        Token::Quoted(s) => Node::string(id, s),
        Token::Open | Token::Close | Token::ArrayOpen | Token::ArrayClose => {
            Node::string(id, "")
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl Parser<'_> {
    /// Parse entries into `target` until `}` (nested) or end of input (top).
    ///
    /// A leaf key may appear once per block; repeated compounds merge.
    fn body(&mut self, target: &mut Node, nested: bool) -> Result<()> {
        let mut leaves = HashSet::new();
        loop {
            let key = match self.lexer.next_token()? {
                None if nested => return Err(self.lexer.error("missing '}'")),
                None => return Ok(()),
                Some(Token::Close) if nested => return Ok(()),
                Some(Token::Word(w)) => w.split('.').map(str::to_string).collect::<Vec<_>>(),
                Some(Token::Quoted(s)) => vec![s],
                Some(t) => return Err(self.lexer.error(format!("unexpected {t:?}"))),
            };
            if key.iter().any(|k| k.is_empty()) {
                return Err(self.lexer.error("empty key"));
            }
            let (last, parents) = match key.split_last() {
                Some(split) => split,
                None => return Err(self.lexer.error("empty key")),
            };
            let mut node = &mut *target;
            for id in parents {
                node = self.compound_child(node, id)?;
            }
            if self.value(node, last)? && !leaves.insert(key.join(".")) {
                return Err(TreeError::Duplicate(format!(
                    "{} (line {})",
                    key.join("."),
                    self.lexer.line
                )));
            }
        }
    }

    fn compound_child<'n>(&self, parent: &'n mut Node, id: &str) -> Result<&'n mut Node> {
        if parent.search(id).is_some_and(|n| !n.is_compound()) {
            parent.replace(Node::compound(id))?;
        }
        parent.ensure_compound(id)
    }

    /// Parse the value of `id`; true when it was a leaf.
    fn value(&mut self, parent: &mut Node, id: &str) -> Result<bool> {
        match self.lexer.next_token()? {
            None => Err(self.lexer.error(format!("missing value for '{id}'"))),
            Some(Token::Open) => {
                let child = self.compound_child(parent, id)?;
                self.body(child, true)?;
                Ok(false)
            }
            Some(Token::ArrayOpen) => {
                let child = self.compound_child(parent, id)?;
                self.array(child)?;
                Ok(false)
            }
            Some(t @ (Token::Word(_) | Token::Quoted(_))) => {
                parent.replace(leaf(id, t))?;
                Ok(true)
            }
            Some(t) => Err(self.lexer.error(format!("unexpected {t:?} after '{id}'"))),
        }
    }

    fn array(&mut self, target: &mut Node) -> Result<()> {
        loop {
            let index = target.children().len().to_string();
            match self.lexer.next_token()? {
                None => return Err(self.lexer.error("missing ']'")),
                Some(Token::ArrayClose) => return Ok(()),
                Some(Token::Open) => {
                    let child = target.add(Node::compound(index))?;
                    self.body(child, true)?;
                }
                Some(Token::ArrayOpen) => {
                    let child = target.add(Node::compound(index))?;
                    self.array(child)?;
                }
                Some(t @ (Token::Word(_) | Token::Quoted(_))) => {
                    target.add(leaf(&index, t))?;
                }
                Some(t) => return Err(self.lexer.error(format!("unexpected {t:?} in array"))),
            }
        }
    }
}

fn plain_word(s: &str, allow_dot: bool) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '_' | '-' | '+' | ':' | '/' | '@')
                || (allow_dot && c == '.')
        })
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn format_key(id: &str) -> String {
    if plain_word(id, false) {
        id.to_string()
    } else {
        quote(id)
    }
}

fn format_string(s: &str) -> String {
    if plain_word(s, true) && parse_integer(s).is_none() {
        s.to_string()
    } else {
        quote(s)
    }
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    let indent = "\t".repeat(depth);
    match node.value() {
        Value::Integer(v) => {
            out.push_str(&format!("{indent}{} {v}\n", format_key(node.id())));
        }
        Value::String(s) => {
            out.push_str(&format!(
                "{indent}{} {}\n",
                format_key(node.id()),
                format_string(s)
            ));
        }
        Value::Compound(children) => {
            out.push_str(&format!("{indent}{} {{\n", format_key(node.id())));
            for child in children {
                write_node(out, child, depth + 1);
            }
            out.push_str(&format!("{indent}}}\n"));
        }
    }
}

impl Node {
    /// Parse a document; the result is an unnamed top-level compound.
    pub fn parse(text: &str) -> Result<Node> {
        let mut top = Node::top();
        top.merge_text(text)?;
        Ok(top)
    }

    /// Parse `text` into this compound, merging with existing content.
    pub fn merge_text(&mut self, text: &str) -> Result<()> {
        if !self.is_compound() {
            return Err(TreeError::NotCompound(self.id().to_string()));
        }
        let mut parser = Parser {
            lexer: Lexer::new(text),
        };
        parser.body(self, false)
    }

    pub fn load(mut reader: impl Read) -> Result<Node> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Node::parse(&text)
    }

    /// Serialize. The top node writes its children only; any other node
    /// writes itself.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if self.id().is_empty() {
            for child in self.children() {
                write_node(&mut out, child, 0);
            }
        } else {
            write_node(&mut out, self, 0);
        }
        out
    }

    pub fn save(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(self.to_text().as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKind;

    #[test]
    fn parses_dotted_keys_and_nesting() -> anyhow::Result<()> {
        let doc = Node::parse(
            "state.PCH {\n\tcontrol.1 {\n\t\tiface mixer\n\t\tname 'Master Playback Volume'\n\t\tvalue.0 10\n\t\tvalue.1 -3\n\t}\n}\n",
        )?;
        let control = doc
            .search_path(&["state", "PCH", "control", "1"])
            .ok_or_else(|| anyhow::anyhow!("control.1 missing"))?;
        assert_eq!(control.search("iface").and_then(Node::as_str), Some("mixer"));
        assert_eq!(
            control.search("name").and_then(Node::as_str),
            Some("Master Playback Volume")
        );
        let value = control.search("value").ok_or_else(|| anyhow::anyhow!("value"))?;
        assert_eq!(value.kind(), NodeKind::Compound);
        assert_eq!(value.search("1").and_then(Node::as_integer), Some(-3));
        Ok(())
    }

    #[test]
    fn quoted_numbers_stay_strings() -> anyhow::Result<()> {
        let doc = Node::parse("a '12'\nb 12\nc 0x1f; d = \"it's\" # trailing\n")?;
        assert_eq!(doc.search("a").map(Node::kind), Some(NodeKind::String));
        assert_eq!(doc.search("b").and_then(Node::as_integer), Some(12));
        assert_eq!(doc.search("c").and_then(Node::as_integer), Some(31));
        assert_eq!(doc.search("d").and_then(Node::as_str), Some("it's"));
        Ok(())
    }

    #[test]
    fn repeated_compounds_merge() -> anyhow::Result<()> {
        let doc = Node::parse("s { a 1 }\ns.b 2\ns { a 3 }\n")?;
        let s = doc.search("s").ok_or_else(|| anyhow::anyhow!("s"))?;
        assert_eq!(s.children().len(), 2);
        assert_eq!(s.search("a").and_then(Node::as_integer), Some(3));
        Ok(())
    }

    #[test]
    fn repeated_leaf_in_one_block_is_rejected() {
        let err = Node::parse("value {\n\t0 1\n\t1 2\n\t0 3\n}\n").err();
        assert!(matches!(err, Some(TreeError::Duplicate(ref key)) if key == "0 (line 4)"));
        assert!(matches!(
            Node::parse("a.b 1\na.b 2\n"),
            Err(TreeError::Duplicate(_))
        ));
        assert!(Node::parse("a { b 1 }\na { b 2 }\n").is_ok());
    }

    #[test]
    fn integer_limits_and_hex() -> anyhow::Result<()> {
        let mut top = Node::top();
        top.add(Node::integer("min", i64::MIN))?;
        top.add(Node::integer("max", i64::MAX))?;
        let again = Node::parse(&top.to_text())?;
        assert_eq!(again, top);

        let doc = Node::parse(
            "a -0x10\nb 0x-5\nc 9223372036854775808\nd -0x8000000000000000\ne 0x\nf +7\n",
        )?;
        assert_eq!(doc.search("a").and_then(Node::as_integer), Some(-16));
        assert_eq!(doc.search("b").and_then(Node::as_str), Some("0x-5"));
        assert_eq!(
            doc.search("c").and_then(Node::as_str),
            Some("9223372036854775808")
        );
        assert_eq!(doc.search("d").and_then(Node::as_integer), Some(i64::MIN));
        assert_eq!(doc.search("e").and_then(Node::as_str), Some("0x"));
        assert_eq!(doc.search("f").and_then(Node::as_integer), Some(7));
        Ok(())
    }

    #[test]
    fn arrays_become_indexed_compounds() -> anyhow::Result<()> {
        let doc = Node::parse("items [ Mic 'Line In' ]")?;
        let items = doc.search("items").ok_or_else(|| anyhow::anyhow!("items"))?;
        assert_eq!(items.search("1").and_then(Node::as_str), Some("Line In"));
        Ok(())
    }

    #[test]
    fn reports_syntax_errors_with_line() {
        let err = Node::parse("a {\n b 1\n").err();
        assert!(matches!(err, Some(TreeError::Syntax { line: 3, .. })));
        assert!(Node::parse("a 'open").is_err());
        assert!(Node::parse("} a 1").is_err());
    }

    #[test]
    fn writer_output_reparses_identically() -> anyhow::Result<()> {
        let mut top = Node::top();
        let card = top.ensure_compound("state")?.ensure_compound("my card")?;
        card.add(Node::string("name", "Mic Boost (+20dB)"))?;
        card.add(Node::string("empty", ""))?;
        card.add(Node::string("digits", "007"))?;
        card.add(Node::string("quote", "a'b\\c\nd"))?;
        card.add(Node::integer("level", -12))?;
        card.add(Node::string("plain", "deadbeef"))?;
        let text = top.to_text();
        assert!(text.contains("'my card' {"));
        assert!(text.contains("plain deadbeef\n"));
        assert!(text.contains("digits '007'\n"));
        let again = Node::parse(&text)?;
        assert_eq!(again, top);
        assert_eq!(again.to_text(), text);
        Ok(())
    }
}
