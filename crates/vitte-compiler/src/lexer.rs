//! lexer.rs — Analyse lexicale du format d'assemblage (spec.md §6 "compile").
//!
//! Calqué sur le lexeur du teacher (`asm.rs`): un `Vec<Tok>` à base de
//! caractères, commentaires `;`, chaînes entre guillemets avec échappement,
//! nombres (entiers/flottants, pas d'hexa/binaire ici — les tests qui
//! consomment ce format n'en ont pas besoin), identifiants. La ponctuation
//! ajoute `(`/`)` (signature `.fn nom(arité)`) et `@` (référence de label),
//! retire `[`/`]` (pas d'opérande mémoire dans ce jeu registre).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Int,
    Float,
    Str,
    Comma,
    Colon,
    At,
    Dot,
    LParen,
    RParen,
    Eq,
    Newline,
}

#[derive(Debug, Clone)]
pub struct Tok {
    pub kind: TokKind,
    pub text: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn lex(src: &str) -> Result<Vec<Tok>, LexError> {
    let mut out = Vec::new();
    let mut line: u32 = 1;
    let mut chars = src.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch == ';' {
            while let Some(c) = chars.next() {
                if c == '\n' {
                    break;
                }
            }
            out.push(Tok { kind: TokKind::Newline, text: "\n".into(), line });
            line += 1;
            continue;
        }
        if ch == '\n' {
            chars.next();
            out.push(Tok { kind: TokKind::Newline, text: "\n".into(), line });
            line += 1;
            continue;
        }
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let single = match ch {
            ',' => Some(TokKind::Comma),
            ':' => Some(TokKind::Colon),
            '@' => Some(TokKind::At),
            '.' => Some(TokKind::Dot),
            '(' => Some(TokKind::LParen),
            ')' => Some(TokKind::RParen),
            '=' => Some(TokKind::Eq),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            out.push(Tok { kind, text: ch.to_string(), line });
            continue;
        }

        if ch == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some(other) => s.push(other),
                        None => return Err(LexError { line, message: "unterminated escape".into() }),
                    },
                    Some(c) => s.push(c),
                    None => return Err(LexError { line, message: "unterminated string literal".into() }),
                }
            }
            out.push(Tok { kind: TokKind::Str, text: s, line });
            continue;
        }

        if ch.is_ascii_digit() || (ch == '-' && chars.clone().nth(1).is_some_and(|d| d.is_ascii_digit())) {
            let mut s = String::new();
            s.push(ch);
            chars.next();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    s.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let kind = if s.contains('.') { TokKind::Float } else { TokKind::Int };
            out.push(Tok { kind, text: s, line });
            continue;
        }

        if is_ident_start(ch) {
            let mut s = String::new();
            s.push(ch);
            chars.next();
            while let Some(&c) = chars.peek() {
                if is_ident_continue(c) {
                    s.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(Tok { kind: TokKind::Ident, text: s, line });
            continue;
        }

        return Err(LexError { line, message: format!("unexpected character {ch:?}") });
    }

    Ok(out)
}
