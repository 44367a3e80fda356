//! Main parser coordinator
//!
//! This module provides the [`Parser`] struct and core parsing infrastructure,
//! including error types, helper methods, and the two parse entry points:
//!
//! - [`Parser::parse_program`]: a whole translation unit (included files)
//! - [`Parser::parse_wrapped_fragment`]: one interactive fragment that the
//!   source wrapper has placed inside `void NAME(void) { ... }`
//!
//! # Parser Architecture
//!
//! The Parser uses a recursive descent approach with the following organization:
//! - This module: Parser struct, helper methods, and coordination
//! - `declarations`: Parsing struct, function and variable declarations
//! - `statements`: Parsing statements (if, while, for, etc.)
//! - `expressions`: Parsing expressions with precedence climbing
//!
//! # Implementation
//!
//! Parser methods are split across multiple files using `impl Parser` blocks,
//! allowing each module to extend the Parser with related functionality while
//! maintaining access to the shared parser state.

use crate::parser::ast::*;
use crate::parser::lexer::{LexError, Lexer, Token};
use thiserror::Error;

/// Parser error type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parse error at line {}, column {}: {message}", .location.line, .location.column)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            location: err.location,
        }
    }
}

/// Recursive descent parser for C subset
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) ends: Vec<usize>,
    pub(crate) position: usize,
    /// Set while parsing a wrapped fragment: the final expression statement
    /// or declaration may omit its `;`.
    pub(crate) open_tail: bool,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(source);
        let (tokens, ends) = lexer.tokenize_with_ends()?;
        Ok(Self {
            tokens,
            ends,
            position: 0,
            open_tail: false,
        })
    }

    /// Parse the entire program (top-level declarations)
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();

        while !self.is_at_end() {
            let decls = self.parse_top_level_declaration()?;
            program.nodes.extend(decls);
        }

        Ok(program)
    }

    /// Parse a fragment wrapped as `void NAME(void) { items }`.
    ///
    /// Items are declarations, definitions, `#include` lines or statements.
    /// Spans are byte ranges into the wrapped text.
    pub fn parse_wrapped_fragment(&mut self) -> Result<Vec<FragmentItem>, ParseError> {
        self.expect_token(
            &Token::Void(self.current_location()),
            "Expected 'void' before fragment wrapper",
        )?;
        self.expect_identifier()?;
        self.expect_lparen("after fragment wrapper name")?;
        self.expect_token(
            &Token::Void(self.current_location()),
            "Expected 'void' in fragment wrapper parameters",
        )?;
        self.expect_rparen("after fragment wrapper parameters")?;
        self.expect_lbrace("before fragment body")?;

        self.open_tail = true;
        let mut items = Vec::new();
        while !self.check(&Token::RBrace(self.current_location())) && !self.is_at_end() {
            items.push(self.parse_fragment_item()?);
        }
        self.open_tail = false;

        self.expect_rbrace("after fragment body")?;
        if !self.is_at_end() {
            return Err(ParseError {
                message: format!("Unexpected {} after end of input", self.peek()),
                location: self.current_location(),
            });
        }

        Ok(items)
    }

    // ===== Helper methods =====

    pub(crate) fn is_type_keyword(&self) -> bool {
        matches!(
            self.peek_token(),
            Token::Int(_)
                | Token::Long(_)
                | Token::Char(_)
                | Token::Void(_)
                | Token::Struct(_)
                | Token::Const(_)
        )
    }

    pub(crate) fn match_token(&mut self, token: &Token) -> bool {
        if std::mem::discriminant(&self.peek_token())
            == std::mem::discriminant(token)
        {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.peek_token())
            == std::mem::discriminant(token)
    }

    pub(crate) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.previous()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(self.peek_token(), Token::Eof(_))
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.position]
    }

    pub(crate) fn peek_token(&self) -> Token {
        self.tokens[self.position].clone()
    }

    pub(crate) fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n)
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.position.saturating_sub(1)]
    }

    pub(crate) fn previous_location(&self) -> SourceLocation {
        self.previous().location()
    }

    pub(crate) fn current_location(&self) -> SourceLocation {
        self.peek().location()
    }

    /// Byte offset where the current token starts.
    pub(crate) fn current_offset(&self) -> usize {
        self.peek().location().offset
    }

    /// Byte offset one past the last consumed token.
    pub(crate) fn previous_end(&self) -> usize {
        self.ends[self.position.saturating_sub(1)]
    }

    pub(crate) fn expect_token(
        &mut self,
        token: &Token,
        message: &str,
    ) -> Result<(), ParseError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(ParseError {
                message: format!("{}, found {}", message, self.peek()),
                location: self.current_location(),
            })
        }
    }

    pub(crate) fn expect_lparen(
        &mut self,
        ctx: &str,
    ) -> Result<(), ParseError> {
        self.expect_token(
            &Token::LParen(self.current_location()),
            &format!("Expected '(' {ctx}"),
        )
    }

    pub(crate) fn expect_rparen(
        &mut self,
        ctx: &str,
    ) -> Result<(), ParseError> {
        self.expect_token(
            &Token::RParen(self.current_location()),
            &format!("Expected ')' {ctx}"),
        )
    }

    pub(crate) fn expect_lbrace(
        &mut self,
        ctx: &str,
    ) -> Result<(), ParseError> {
        self.expect_token(
            &Token::LBrace(self.current_location()),
            &format!("Expected '{{' {ctx}"),
        )
    }

    pub(crate) fn expect_rbrace(
        &mut self,
        ctx: &str,
    ) -> Result<(), ParseError> {
        self.expect_token(
            &Token::RBrace(self.current_location()),
            &format!("Expected '}}' {ctx}"),
        )
    }

    pub(crate) fn expect_semicolon(
        &mut self,
        ctx: &str,
    ) -> Result<(), ParseError> {
        self.expect_token(
            &Token::Semicolon(self.current_location()),
            &format!("Expected ';' {ctx}"),
        )
    }

    /// Like [`Parser::expect_semicolon`], but in fragment mode a missing `;`
    /// right before the closing wrapper brace is accepted. Returns whether a
    /// `;` was present.
    pub(crate) fn expect_terminator(&mut self, ctx: &str) -> Result<bool, ParseError> {
        if self.match_token(&Token::Semicolon(self.current_location())) {
            return Ok(true);
        }
        if self.open_tail
            && self.check(&Token::RBrace(self.current_location()))
            && matches!(self.peek_ahead(1), Some(Token::Eof(_)))
        {
            return Ok(false);
        }
        self.expect_semicolon(ctx).map(|_| true)
    }

    pub(crate) fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let Token::Ident(name, _) = self.peek_token() {
            self.advance();
            Ok(name)
        } else {
            Err(ParseError {
                message: format!("Expected identifier, found {}", self.peek()),
                location: self.current_location(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!("void __wrap(void) {{\n{}\n}}", body)
    }

    #[test]
    fn test_parse_simple_function() {
        let source = "int main() { return 0; }";
        let mut parser = Parser::new(source).unwrap();
        let program = parser.parse_program().unwrap();

        assert_eq!(program.nodes.len(), 1);
        match &program.nodes[0] {
            AstNode::FunctionDef {
                name,
                params,
                return_type,
                body,
                ..
            } => {
                assert_eq!(name, "main");
                assert_eq!(params.len(), 0);
                assert_eq!(return_type.base, BaseType::Int);
                assert_eq!(body.as_ref().map(|b| b.len()), Some(1));
            }
            _ => panic!("Expected function definition"),
        }
    }

    #[test]
    fn test_parse_prototype_and_globals() {
        let source = "int add(int a, int b);\nint x = 1, *p, arr[3] = {1, 2, 3};";
        let mut parser = Parser::new(source).unwrap();
        let program = parser.parse_program().unwrap();

        assert_eq!(program.nodes.len(), 4);
        assert!(matches!(&program.nodes[0], AstNode::FunctionDef { body: None, .. }));
        match &program.nodes[2] {
            AstNode::VarDecl { name, var_type, .. } => {
                assert_eq!(name, "p");
                assert_eq!(var_type.pointer_depth, 1);
            }
            other => panic!("Expected VarDecl, got {:?}", other),
        }
        match &program.nodes[3] {
            AstNode::VarDecl { init: Some(init), .. } => {
                assert!(matches!(**init, AstNode::InitList { ref items, .. } if items.len() == 3));
            }
            other => panic!("Expected initialized VarDecl, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_struct() {
        let source = "struct Point { int x; int y; };";
        let mut parser = Parser::new(source).unwrap();
        let program = parser.parse_program().unwrap();

        assert_eq!(program.nodes.len(), 1);
        match &program.nodes[0] {
            AstNode::StructDef { name, fields, .. } => {
                assert_eq!(name, "Point");
                assert_eq!(fields.len(), 2);
            }
            _ => panic!("Expected struct definition"),
        }
    }

    #[test]
    fn test_fragment_items_and_spans() {
        let source = wrap("int x = 5;\nx++;\nint f(void) { return 1; }");
        let mut parser = Parser::new(&source).unwrap();
        let items = parser.parse_wrapped_fragment().unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].span.slice(&source), "int x = 5;");
        assert_eq!(items[1].span.slice(&source), "x++;");
        assert_eq!(items[2].span.slice(&source), "int f(void) { return 1; }");
        assert!(items.iter().all(|item| item.terminated));
    }

    #[test]
    fn test_fragment_open_tail() {
        let source = wrap("x = 1; x + 1");
        let mut parser = Parser::new(&source).unwrap();
        let items = parser.parse_wrapped_fragment().unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].terminated);
        assert!(!items[1].terminated);
        assert_eq!(items[1].span.slice(&source), "x + 1");
    }

    #[test]
    fn test_fragment_missing_semicolon_mid_body() {
        let source = wrap("x = 1 y = 2;");
        let mut parser = Parser::new(&source).unwrap();
        assert!(parser.parse_wrapped_fragment().is_err());
    }

    #[test]
    fn test_fragment_stray_brace() {
        let source = wrap("x = 1; }");
        let mut parser = Parser::new(&source).unwrap();
        assert!(parser.parse_wrapped_fragment().is_err());
    }
}
