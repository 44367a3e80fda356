//! Statement parsing implementation
//!
//! This module handles parsing of all C statement types:
//!
//! - Variable declarations: `int x = 42, y;`
//! - Control flow: `if`, `while`, `for`, `do-while`
//! - Jump statements: `return`, `break`, `continue`
//! - Compound statements: `{ ... }` and the empty statement `;`
//! - Expression statements: function calls, assignments
//!
//! # Grammar
//!
//! ```text
//! statement ::= var_decl | if_stmt | while_stmt | for_stmt
//!             | do_while_stmt | return_stmt | break_stmt
//!             | continue_stmt | block | ";" | expr_stmt
//! ```
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::parser::ast::*;
use crate::parser::lexer::Token;
use crate::parser::parse::{ParseError, Parser};

impl Parser {
    /// Parse block statements (inside braces, excluding the braces themselves)
    pub(crate) fn parse_block_statements(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut statements = Vec::new();

        while !self.check(&Token::RBrace(self.current_location())) && !self.is_at_end() {
            if self.is_type_keyword() {
                statements.extend(self.parse_variable_declaration()?);
            } else {
                statements.push(self.parse_statement()?);
            }
        }

        Ok(statements)
    }

    /// Parse a statement
    pub(crate) fn parse_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.current_location();

        // Check for keywords first
        if self.match_token(&Token::Return(loc)) {
            return self.parse_return_statement();
        }

        if self.match_token(&Token::If(loc)) {
            return self.parse_if_statement();
        }

        if self.match_token(&Token::While(loc)) {
            return self.parse_while_statement();
        }

        if self.match_token(&Token::Do(loc)) {
            return self.parse_do_while_statement();
        }

        if self.match_token(&Token::For(loc)) {
            return self.parse_for_statement();
        }

        if self.match_token(&Token::Break(loc)) {
            self.expect_token(
                &Token::Semicolon(self.current_location()),
                "Expected ';' after 'break'",
            )?;
            return Ok(AstNode::Break { location: loc });
        }

        if self.match_token(&Token::Continue(loc)) {
            self.expect_token(
                &Token::Semicolon(self.current_location()),
                "Expected ';' after 'continue'",
            )?;
            return Ok(AstNode::Continue { location: loc });
        }

        if self.match_token(&Token::LBrace(loc)) {
            let statements = self.parse_block_statements()?;
            self.expect_token(
                &Token::RBrace(self.current_location()),
                "Expected '}' after block",
            )?;
            return Ok(AstNode::Block {
                statements,
                location: loc,
            });
        }

        if self.match_token(&Token::Semicolon(loc)) {
            return Ok(AstNode::Block {
                statements: Vec::new(),
                location: loc,
            });
        }

        // Check for variable declaration (type followed by identifier)
        if self.is_type_keyword() {
            let mut decls = self.parse_variable_declaration()?;
            if decls.len() == 1 {
                return Ok(decls.remove(0));
            }
            return Ok(AstNode::Block {
                statements: decls,
                location: loc,
            });
        }

        // Otherwise, it's an expression statement
        let expr = self.parse_expression()?;
        self.expect_token(
            &Token::Semicolon(self.current_location()),
            "Expected ';' after expression",
        )?;
        Ok(AstNode::ExpressionStatement {
            expr: Box::new(expr),
            location: loc,
        })
    }

    /// Parse return statement
    fn parse_return_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        let expr = if self.check(&Token::Semicolon(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        self.expect_token(
            &Token::Semicolon(self.current_location()),
            "Expected ';' after return",
        )?;

        Ok(AstNode::Return {
            expr,
            location: loc,
        })
    }

    /// Parse if statement
    fn parse_if_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        self.expect_token(
            &Token::LParen(self.current_location()),
            "Expected '(' after 'if'",
        )?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_token(
            &Token::RParen(self.current_location()),
            "Expected ')' after if condition",
        )?;

        let then_branch = self.parse_statement_or_block()?;

        let else_branch = if self.match_token(&Token::Else(self.current_location())) {
            Some(self.parse_statement_or_block()?)
        } else {
            None
        };

        Ok(AstNode::If {
            condition,
            then_branch,
            else_branch,
            location: loc,
        })
    }

    /// Parse while statement
    fn parse_while_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        self.expect_token(
            &Token::LParen(self.current_location()),
            "Expected '(' after 'while'",
        )?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_token(
            &Token::RParen(self.current_location()),
            "Expected ')' after while condition",
        )?;

        let body = self.parse_statement_or_block()?;

        Ok(AstNode::While {
            condition,
            body,
            location: loc,
        })
    }

    /// Parse do-while statement
    fn parse_do_while_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        let body = self.parse_statement_or_block()?;

        self.expect_token(
            &Token::While(self.current_location()),
            "Expected 'while' after do body",
        )?;
        self.expect_token(
            &Token::LParen(self.current_location()),
            "Expected '(' after 'while'",
        )?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_token(
            &Token::RParen(self.current_location()),
            "Expected ')' after do-while condition",
        )?;
        self.expect_token(
            &Token::Semicolon(self.current_location()),
            "Expected ';' after do-while",
        )?;

        Ok(AstNode::DoWhile {
            body,
            condition,
            location: loc,
        })
    }

    /// Parse for statement
    fn parse_for_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        self.expect_token(
            &Token::LParen(self.current_location()),
            "Expected '(' after 'for'",
        )?;

        // Init (optional)
        let init = if self.check(&Token::Semicolon(self.current_location())) {
            self.advance();
            None
        } else if self.is_type_keyword() {
            // Variable declaration
            let init_loc = self.current_location();
            let mut decls = self.parse_variable_declaration()?;
            // Declaration includes semicolon, so don't expect another
            if decls.len() != 1 {
                return Err(ParseError {
                    message: "Only one declaration is supported in a for initializer".to_string(),
                    location: init_loc,
                });
            }
            Some(Box::new(decls.remove(0)))
        } else {
            // Expression
            let expr = self.parse_expression()?;
            self.expect_token(
                &Token::Semicolon(self.current_location()),
                "Expected ';' after for init",
            )?;
            Some(Box::new(expr))
        };

        // Condition (optional)
        let condition = if self.check(&Token::Semicolon(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect_token(
            &Token::Semicolon(self.current_location()),
            "Expected ';' after for condition",
        )?;

        // Increment (optional)
        let increment = if self.check(&Token::RParen(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        self.expect_token(
            &Token::RParen(self.current_location()),
            "Expected ')' after for clauses",
        )?;

        let body = self.parse_statement_or_block()?;

        Ok(AstNode::For {
            init,
            condition,
            increment,
            body,
            location: loc,
        })
    }

    /// Parse statement or block (for if/while/for bodies)
    pub(crate) fn parse_statement_or_block(&mut self) -> Result<Vec<AstNode>, ParseError> {
        if self.match_token(&Token::LBrace(self.current_location())) {
            let statements = self.parse_block_statements()?;
            self.expect_token(
                &Token::RBrace(self.current_location()),
                "Expected '}' after block",
            )?;
            Ok(statements)
        } else {
            // Single statement
            Ok(vec![self.parse_statement()?])
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    fn body_of(source: &str) -> Vec<AstNode> {
        let mut parser = Parser::new(source).unwrap();
        match parser.parse_program().unwrap().nodes.remove(0) {
            AstNode::FunctionDef { body: Some(body), .. } => body,
            other => panic!("Expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_block_declarations_flatten() {
        let body = body_of("void f(void) { int a = 1, b; a = b; }");
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0], AstNode::VarDecl { .. }));
        assert!(matches!(body[1], AstNode::VarDecl { .. }));
    }

    #[test]
    fn test_for_with_declaration() {
        let body = body_of("void f(void) { for (int i = 0; i < 3; i++) ; }");
        match &body[0] {
            AstNode::For { init: Some(init), .. } => {
                assert!(matches!(**init, AstNode::VarDecl { .. }));
            }
            other => panic!("Expected For, got {:?}", other),
        }
    }

    #[test]
    fn test_switch_not_supported() {
        let mut parser = Parser::new("void f(int x) { switch (x) { } }").unwrap();
        assert!(parser.parse_program().is_err());
    }
}
