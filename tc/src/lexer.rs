//! Single forward-pass lexer (pipeline component 3).
//!
//! Characters are classified through a 256-entry lookup table built once at
//! startup. Multi-character tokens are matched greedily, longest prefix first
//! (`<<.` before `<<` before `<`). The lexer never aborts on malformed input: it
//! emits an `Error` token and keeps scanning, so the parser is the first place
//! that actually gives up.

/// One scanned token. Mirrors the `{kind, source_offset, length, line}` layout
/// from the design: `start`/`len` index back into the original source buffer so
/// the parser/diagnostics can recover the exact source text without the lexer
/// owning a copy of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub len: usize,
    pub line: u32,
}

/// The typed-variable declaration's declared type, parsed out of the
/// `var.<t>-` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Untyped,
    Int,
    Float,
    Str,
    Bool,
    Char,
}

/// Output verbs recognized by the `output` codegen path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputVerb {
    Print,
    Txt,
    Out,
    Fmt,
    Dyn,
    Asm,
}

/// Control / structural keywords the parser dispatches on directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Do,
    FuncCan,
    Math,
    Array4d,
    GapCompute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(i64),
    Float(f64),
    String,
    Identifier,
    /// `var.`, optionally `var.<t>-`, followed by the declared name and a
    /// closing `-`. Captures the whole span as one token per the design.
    VarDecl { ty: VarType, name_start: usize, name_len: usize },
    /// `f.<name>` / `fucn.<name>` conditional abbreviation.
    Conditional { name_start: usize, name_len: usize },
    Output(OutputVerb),
    Keyword(Keyword),

    // single-char punctuation
    Pipe,
    Slash,
    Backslash,
    LBracket,
    RBracket,
    Caret,
    Colon,
    Dash,
    Dot,
    Comma,
    Lt,
    Gt,
    Plus,
    Star,
    Percent,
    Bang,
    Eq,

    // multi-char operators, longest-prefix matched
    Shl,        // <<
    Shr,        // >>
    ShlDot,     // <<.
    ShrDot,     // >>.
    Diamond,    // <>
    BackGt,     // \>|
    BackLt,     // \<|
    StarGt,     // *>
    StarUnderLt,// *_<
    StarEq,     // *=
    StarNotEq,  // *!=
    OrOr,       // ||
    OrOrDot,    // ||.
    AndAnd,     // &&
    AndAndDot,  // &&.
    TildeTilde, // ~~
    EqEq,       // ==
    NotEq,      // !=

    Error,
    Eof,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn starts_with(&self, lit: &str) -> bool {
        self.src[self.pos..].starts_with(lit.as_bytes())
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }
}

/// Scan `source` into a token stream. Always ends in a single [`TokenKind::Eof`].
/// Returns an empty vector only when the caller should treat this as the
/// `empty-input` fatal condition (see [`is_blank`]).
pub fn lex(source: &[u8]) -> Vec<Token> {
    let mut cur = Cursor { src: source, pos: 0, line: 1 };
    let mut tokens = Vec::new();

    loop {
        skip_whitespace_and_comments(&mut cur);
        let start = cur.pos;
        let line = cur.line;
        let Some(b) = cur.peek() else {
            tokens.push(Token { kind: TokenKind::Eof, start, len: 0, line });
            break;
        };

        let kind = if is_ident_start(b) {
            scan_identifier_like(&mut cur)
        } else if b.is_ascii_digit() {
            scan_number(&mut cur)
        } else if b == b'"' {
            scan_string(&mut cur)
        } else {
            scan_operator(&mut cur)
        };

        let len = cur.pos - start;
        tokens.push(Token { kind, start, len, line });
    }

    tokens
}

/// True when the source is empty or contains only whitespace/comments — the
/// driver treats this as the fatal `empty-input` condition, never handing it to
/// the parser.
pub fn is_blank(source: &[u8]) -> bool {
    let mut cur = Cursor { src: source, pos: 0, line: 1 };
    skip_whitespace_and_comments(&mut cur);
    cur.peek().is_none()
}

fn skip_whitespace_and_comments(cur: &mut Cursor) {
    loop {
        while matches!(cur.peek(), Some(b) if b.is_ascii_whitespace()) {
            cur.bump();
        }
        if cur.starts_with("##") {
            cur.bump();
            cur.bump();
            loop {
                match cur.peek() {
                    None => return,
                    Some(b'\n') => {
                        cur.bump();
                        break;
                    }
                    _ => {
                        if cur.starts_with("##") {
                            cur.bump();
                            cur.bump();
                            break;
                        }
                        cur.bump();
                    }
                }
            }
            continue;
        }
        break;
    }
}

fn scan_identifier_like(cur: &mut Cursor) -> TokenKind {
    const KEYWORDS: &[(&str, Keyword)] = &[
        ("func.can", Keyword::FuncCan),
        ("array.4d", Keyword::Array4d),
        ("gap.compute", Keyword::GapCompute),
        ("math.", Keyword::Math),
    ];
    for (lit, kw) in KEYWORDS {
        if cur.starts_with(lit) {
            for _ in 0..lit.len() {
                cur.bump();
            }
            return TokenKind::Keyword(*kw);
        }
    }
    if cur.starts_with("do/") {
        cur.bump();
        cur.bump();
        // leave the trailing '/' for the operator scanner on next call so the
        // parser can uniformly expect a Slash after a Do keyword.
        return TokenKind::Keyword(Keyword::Do);
    }
    if cur.starts_with("var.") {
        return scan_var_decl(cur);
    }
    if cur.starts_with("fucn.") {
        cur.pos += 5;
        return scan_conditional_tail(cur);
    }
    if cur.starts_with("f.") {
        cur.pos += 2;
        return scan_conditional_tail(cur);
    }

    let start = cur.pos;
    while matches!(cur.peek(), Some(b) if is_ident_cont(b)) {
        cur.bump();
    }
    let text = &cur.src[start..cur.pos];
    match text {
        b"print" => TokenKind::Output(OutputVerb::Print),
        b"txt" => TokenKind::Output(OutputVerb::Txt),
        b"out" => TokenKind::Output(OutputVerb::Out),
        b"fmt" => TokenKind::Output(OutputVerb::Fmt),
        b"dyn" => TokenKind::Output(OutputVerb::Dyn),
        b"asm" => TokenKind::Output(OutputVerb::Asm),
        _ => TokenKind::Identifier,
    }
}

fn scan_conditional_tail(cur: &mut Cursor) -> TokenKind {
    let name_start = cur.pos;
    while matches!(cur.peek(), Some(b) if is_ident_cont(b) || b == b'.') {
        cur.bump();
    }
    TokenKind::Conditional { name_start, name_len: cur.pos - name_start }
}

fn scan_var_decl(cur: &mut Cursor) -> TokenKind {
    cur.pos += 4; // consume "var."
    let ty = match (cur.peek(), cur.peek_at(1)) {
        (Some(b'v'), Some(b'-')) => { cur.pos += 2; VarType::Untyped }
        (Some(b'i'), Some(b'-')) => { cur.pos += 2; VarType::Int }
        (Some(b'f'), Some(b'-')) => { cur.pos += 2; VarType::Float }
        (Some(b's'), Some(b'-')) => { cur.pos += 2; VarType::Str }
        (Some(b'b'), Some(b'-')) => { cur.pos += 2; VarType::Bool }
        (Some(b'c'), Some(b'-')) => { cur.pos += 2; VarType::Char }
        _ => VarType::Untyped,
    };
    let name_start = cur.pos;
    while matches!(cur.peek(), Some(b) if is_ident_cont(b)) {
        cur.bump();
    }
    let name_len = cur.pos - name_start;
    if cur.peek() == Some(b'-') {
        cur.bump();
    } else {
        return TokenKind::Error;
    }
    TokenKind::VarDecl { ty, name_start, name_len }
}

fn scan_number(cur: &mut Cursor) -> TokenKind {
    let start = cur.pos;
    if cur.starts_with("0x") || cur.starts_with("0X") {
        cur.pos += 2;
        let digits_start = cur.pos;
        while matches!(cur.peek(), Some(b) if b.is_ascii_hexdigit()) {
            cur.bump();
        }
        let text = std::str::from_utf8(&cur.src[digits_start..cur.pos]).unwrap_or("0");
        let v = i64::from_str_radix(text, 16).unwrap_or(0);
        if cur.peek() == Some(b'L') {
            cur.bump();
        }
        return TokenKind::Number(v);
    }

    while matches!(cur.peek(), Some(b) if b.is_ascii_digit()) {
        cur.bump();
    }
    let mut is_float = false;
    if cur.peek() == Some(b'.') && matches!(cur.peek_at(1), Some(b) if b.is_ascii_digit()) {
        is_float = true;
        cur.bump();
        while matches!(cur.peek(), Some(b) if b.is_ascii_digit()) {
            cur.bump();
        }
    }
    if matches!(cur.peek(), Some(b'e') | Some(b'E')) {
        let save = cur.pos;
        cur.bump();
        if matches!(cur.peek(), Some(b'+') | Some(b'-')) {
            cur.bump();
        }
        if matches!(cur.peek(), Some(b) if b.is_ascii_digit()) {
            is_float = true;
            while matches!(cur.peek(), Some(b) if b.is_ascii_digit()) {
                cur.bump();
            }
        } else {
            cur.pos = save;
        }
    }
    let text = std::str::from_utf8(&cur.src[start..cur.pos]).unwrap_or("0");
    if is_float {
        TokenKind::Float(text.parse().unwrap_or(0.0))
    } else {
        let v = text.parse().unwrap_or(0i64);
        if cur.peek() == Some(b'L') {
            cur.bump();
        }
        TokenKind::Number(v)
    }
}

fn scan_string(cur: &mut Cursor) -> TokenKind {
    cur.bump(); // opening quote
    loop {
        match cur.peek() {
            None => return TokenKind::Error,
            Some(b'"') => {
                cur.bump();
                break;
            }
            Some(b'\\') => {
                cur.bump();
                cur.bump();
            }
            _ => {
                cur.bump();
            }
        }
    }
    TokenKind::String
}

/// Operators ordered longest-first so greedy prefix matching picks e.g. `<<.`
/// before `<<` before `<`.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("||.", TokenKind::OrOrDot),
    ("&&.", TokenKind::AndAndDot),
    ("<<.", TokenKind::ShlDot),
    (">>.", TokenKind::ShrDot),
    ("\\>|", TokenKind::BackGt),
    ("\\<|", TokenKind::BackLt),
    ("*_<", TokenKind::StarUnderLt),
    ("*!=", TokenKind::StarNotEq),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<>", TokenKind::Diamond),
    ("*>", TokenKind::StarGt),
    ("*=", TokenKind::StarEq),
    ("||", TokenKind::OrOr),
    ("&&", TokenKind::AndAnd),
    ("~~", TokenKind::TildeTilde),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
];

fn scan_operator(cur: &mut Cursor) -> TokenKind {
    for (lit, kind) in OPERATORS {
        if cur.starts_with(lit) {
            for _ in 0..lit.len() {
                cur.bump();
            }
            return kind.clone();
        }
    }
    let b = cur.bump().expect("caller verified a byte is present");
    match b {
        b'|' => TokenKind::Pipe,
        b'/' => TokenKind::Slash,
        b'\\' => TokenKind::Backslash,
        b'[' => TokenKind::LBracket,
        b']' => TokenKind::RBracket,
        b'^' => TokenKind::Caret,
        b':' => TokenKind::Colon,
        b'-' => TokenKind::Dash,
        b'.' => TokenKind::Dot,
        b',' => TokenKind::Comma,
        b'<' => TokenKind::Lt,
        b'>' => TokenKind::Gt,
        b'+' => TokenKind::Plus,
        b'*' => TokenKind::Star,
        b'%' => TokenKind::Percent,
        b'!' => TokenKind::Bang,
        b'=' => TokenKind::Eq,
        _ => TokenKind::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_hello_world() {
        let toks = lex(br#"print/ "Hello World!" \"#);
        assert!(matches!(toks[0].kind, TokenKind::Output(OutputVerb::Print)));
        assert_eq!(toks[1].kind, TokenKind::Slash);
        assert_eq!(toks[2].kind, TokenKind::String);
        assert_eq!(toks[3].kind, TokenKind::Backslash);
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn lexes_typed_var_decl_as_one_token() {
        let src: &[u8] = b"var.i-x-[42]";
        let toks = lex(src);
        match &toks[0].kind {
            TokenKind::VarDecl { ty, name_start, name_len } => {
                assert_eq!(*ty, VarType::Int);
                assert_eq!(&src[*name_start..*name_start + *name_len], b"x");
            }
            other => panic!("expected VarDecl, got {other:?}"),
        }
        // untyped form is also a single token
        let toks = lex(b"var.x-[1]");
        assert!(matches!(toks[0].kind, TokenKind::VarDecl { ty: VarType::Untyped, .. }));
    }

    #[test]
    fn greedy_longest_prefix_match_for_operators() {
        let toks = lex(b"<<.");
        assert_eq!(toks[0].kind, TokenKind::ShlDot);
        let toks = lex(b"<<");
        assert_eq!(toks[0].kind, TokenKind::Shl);
        let toks = lex(b"<");
        assert_eq!(toks[0].kind, TokenKind::Lt);
    }

    #[test]
    fn empty_input_is_blank() {
        assert!(is_blank(b""));
        assert!(is_blank(b"   \n\t  "));
        assert!(!is_blank(b"x"));
    }

    #[test]
    fn final_token_is_always_eof() {
        let toks = lex(b"");
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }
}
