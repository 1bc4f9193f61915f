//! parser.rs — Tokens -> [`AsmModule`] (spec.md §6 "compile").
//!
//! Grammaire, par bloc:
//! ```text
//! .fn name(arity) slots=N
//!     label:
//!     MNEMONIC op, op, op
//! .endfn
//! ```
//! Une unité peut contenir plusieurs blocs `.fn`; celui nommé `main` est le
//! corps de haut niveau du module (spec.md §4.H), les autres ne sont
//! atteignables que via `CLOSURE a, nom` (voir `assemble.rs`).

use crate::ast::{AsmModule, FnBlock, Item, Operand, RawInstr};
use crate::lexer::{Tok, TokKind};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

struct Parser<'a> {
    toks: &'a [Tok],
    i: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(toks: &'a [Tok]) -> Self {
        Self { toks, i: 0 }
    }

    fn peek(&self) -> Option<&'a Tok> {
        self.toks.get(self.i)
    }

    fn peek_kind(&self) -> Option<TokKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) -> Option<&'a Tok> {
        let t = self.toks.get(self.i);
        self.i += 1;
        t
    }

    fn eat_newlines(&mut self) {
        while matches!(self.peek_kind(), Some(TokKind::Newline)) {
            self.i += 1;
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        let line = self.peek().or_else(|| self.toks.last()).map(|t| t.line).unwrap_or(0);
        ParseError { line, message: message.into() }
    }

    fn expect(&mut self, kind: TokKind) -> PResult<&'a Tok> {
        match self.bump() {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(ParseError { line: t.line, message: format!("expected {kind:?}, found {:?} {:?}", t.kind, t.text) }),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        Ok(self.expect(TokKind::Ident)?.text.clone())
    }

    fn expect_int(&mut self) -> PResult<i64> {
        let t = self.expect(TokKind::Int)?;
        t.text.parse::<i64>().map_err(|e| ParseError { line: t.line, message: format!("bad integer: {e}") })
    }

    fn parse(mut self) -> PResult<AsmModule> {
        let mut module = AsmModule::default();
        loop {
            self.eat_newlines();
            match self.peek() {
                None => break,
                Some(Tok { kind: TokKind::Dot, .. }) => {
                    module.fns.push(self.parse_fn_block()?);
                }
                Some(t) => return Err(ParseError { line: t.line, message: format!("expected `.fn`, found {:?}", t.text) }),
            }
        }
        Ok(module)
    }

    fn parse_fn_block(&mut self) -> PResult<FnBlock> {
        self.expect(TokKind::Dot)?;
        let directive = self.expect_ident()?;
        if directive != "fn" {
            return Err(self.err(format!("expected `.fn`, found `.{directive}`")));
        }
        let name = self.expect_ident()?;
        self.expect(TokKind::LParen)?;
        let arity = self.expect_int()?;
        self.expect(TokKind::RParen)?;

        let mut max_slots = arity.max(0) as u8;
        if matches!(self.peek_kind(), Some(TokKind::Ident)) && self.peek().unwrap().text == "slots" {
            self.bump();
            self.expect(TokKind::Eq)?;
            max_slots = self.expect_int()? as u8;
        }
        self.eat_newlines();

        let mut items = Vec::new();
        loop {
            self.eat_newlines();
            match self.peek() {
                None => return Err(self.err("unterminated `.fn` block, expected `.endfn`")),
                Some(Tok { kind: TokKind::Dot, .. }) => {
                    let save = self.i;
                    self.bump();
                    let word = self.expect_ident()?;
                    if word == "endfn" {
                        break;
                    }
                    self.i = save;
                    return Err(self.err(format!("unexpected directive `.{word}` inside `.fn {name}`")));
                }
                Some(Tok { kind: TokKind::Ident, text, line }) => {
                    if self.toks.get(self.i + 1).map(|t| t.kind) == Some(TokKind::Colon) {
                        let label = text.clone();
                        self.i += 2;
                        items.push(Item::Label(label));
                    } else {
                        let line = *line;
                        items.push(Item::Instr(self.parse_instr(line)?));
                    }
                }
                Some(t) => return Err(ParseError { line: t.line, message: format!("expected label or instruction, found {:?}", t.text) }),
            }
        }

        Ok(FnBlock { name, arity: arity.max(0) as u8, max_slots, items })
    }

    fn parse_instr(&mut self, line: u32) -> PResult<RawInstr> {
        let mnemonic = self.expect_ident()?.to_uppercase();
        let mut operands = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokKind::Newline) | None => break,
                Some(TokKind::Comma) => {
                    self.bump();
                }
                _ => operands.push(self.parse_operand()?),
            }
        }
        Ok(RawInstr { line, mnemonic, operands })
    }

    fn parse_operand(&mut self) -> PResult<Operand> {
        match self.peek_kind() {
            Some(TokKind::Ident) => {
                let t = self.bump().unwrap();
                let text = t.text.clone();
                if let Some(rest) = text.strip_prefix('r') {
                    if let Ok(idx) = rest.parse::<u16>() {
                        return Ok(Operand::Reg(idx));
                    }
                }
                Ok(Operand::Ident(text))
            }
            Some(TokKind::Int) => {
                let t = self.bump().unwrap();
                t.text.parse::<i64>().map(Operand::Int).map_err(|e| ParseError { line: t.line, message: format!("bad integer: {e}") })
            }
            Some(TokKind::Float) => {
                let t = self.bump().unwrap();
                t.text.parse::<f64>().map(Operand::Float).map_err(|_| ParseError { line: t.line, message: "bad float".into() })
            }
            Some(TokKind::Str) => {
                let t = self.bump().unwrap();
                Ok(Operand::Str(t.text.clone()))
            }
            Some(TokKind::At) => {
                self.bump();
                Ok(Operand::LabelRef(self.expect_ident()?))
            }
            Some(_) => Err(self.err("unexpected token in operand position")),
            None => Err(self.err("unexpected end of input in operand position")),
        }
    }
}

pub fn parse(toks: &[Tok]) -> PResult<AsmModule> {
    Parser::new(toks).parse()
}
