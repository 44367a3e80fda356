//! Declaration parsing implementation
//!
//! This module handles parsing of declarations in C programs and fragments:
//!
//! - Struct definitions: `struct Name { ... };`
//! - Function definitions and prototypes: `type name(params) { ... }`
//! - Variable declarations with several declarators: `int x = 1, *p, a[3];`
//! - Aggregate initializers: `{1, 2, {3, 4}}`
//! - Type parsing: base types, pointers, arrays
//! - Fragment items: any of the above, an `#include`, or a statement
//!
//! # Grammar
//!
//! ```text
//! declaration   ::= include | struct_def | function_def | var_decl
//! struct_def    ::= "struct" identifier "{" field_list "}" ";"
//! function_def  ::= type identifier "(" params ")" ( "{" statements "}" | ";" )
//! var_decl      ::= specifier declarator ( "," declarator )* ";"
//! declarator    ::= "*"* identifier ( "[" int "]" )* ( "=" initializer )?
//! initializer   ::= assignment_expr | "{" initializer ( "," initializer )* ","? "}"
//! type          ::= specifier pointer* array_dims*
//! fragment_item ::= declaration | statement
//! ```
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::parser::ast::*;
use crate::parser::lexer::Token;
use crate::parser::parse::{ParseError, Parser};

impl Parser {
    /// Parse a top-level declaration (include, struct, function or variables)
    pub(crate) fn parse_top_level_declaration(&mut self) -> Result<Vec<AstNode>, ParseError> {
        if let Token::Include(path, system, location) = self.peek_token() {
            self.advance();
            return Ok(vec![AstNode::Include {
                path,
                system,
                location,
            }]);
        }

        if self.is_struct_definition_ahead() {
            self.advance(); // consume 'struct'
            return Ok(vec![self.parse_struct_definition()?]);
        }

        if self.is_function_ahead() {
            return Ok(vec![self.parse_function_definition()?]);
        }

        self.parse_variable_declaration()
    }

    /// Parse one item of a wrapped fragment, recording its byte span.
    pub(crate) fn parse_fragment_item(&mut self) -> Result<FragmentItem, ParseError> {
        let start = self.current_offset();

        let (nodes, terminated) = if let Token::Include(path, system, location) = self.peek_token() {
            self.advance();
            (
                vec![AstNode::Include {
                    path,
                    system,
                    location,
                }],
                true,
            )
        } else if self.is_struct_definition_ahead() {
            self.advance(); // consume 'struct'
            (vec![self.parse_struct_definition()?], true)
        } else if self.is_function_ahead() {
            (vec![self.parse_function_definition()?], true)
        } else if self.is_type_keyword() {
            let nodes = self.parse_declarators()?;
            let terminated = self.expect_terminator("after variable declaration")?;
            (nodes, terminated)
        } else if self.starts_keyword_statement() {
            (vec![self.parse_statement()?], true)
        } else {
            let loc = self.current_location();
            let expr = self.parse_expression()?;
            let terminated = self.expect_terminator("after expression")?;
            (
                vec![AstNode::ExpressionStatement {
                    expr: Box::new(expr),
                    location: loc,
                }],
                terminated,
            )
        };

        Ok(FragmentItem {
            nodes,
            span: Span::new(start, self.previous_end()),
            terminated,
        })
    }

    /// `struct Name {` starts a definition; `struct Name x` does not.
    fn is_struct_definition_ahead(&self) -> bool {
        matches!(self.peek(), Token::Struct(_))
            && matches!(self.peek_ahead(1), Some(Token::Ident(_, _)))
            && matches!(self.peek_ahead(2), Some(Token::LBrace(_)))
    }

    /// `type name (` starts a function definition or prototype.
    fn is_function_ahead(&mut self) -> bool {
        if !self.is_type_keyword() {
            return false;
        }
        let saved_pos = self.position;
        let is_function = self.parse_type().is_ok()
            && matches!(self.peek(), Token::Ident(_, _))
            && matches!(self.peek_ahead(1), Some(Token::LParen(_)));
        self.position = saved_pos;
        is_function
    }

    fn starts_keyword_statement(&self) -> bool {
        matches!(
            self.peek(),
            Token::Return(_)
                | Token::If(_)
                | Token::While(_)
                | Token::Do(_)
                | Token::For(_)
                | Token::Break(_)
                | Token::Continue(_)
                | Token::LBrace(_)
                | Token::Semicolon(_)
        )
    }

    /// Parse struct definition: struct Name { fields };
    pub(crate) fn parse_struct_definition(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        let name = self.expect_identifier()?;

        self.expect_lbrace("after struct name")?;

        let mut fields = Vec::new();
        while !self.check(&Token::RBrace(self.current_location())) && !self.is_at_end() {
            let mut field_type = self.parse_type()?;
            let field_name = self.expect_identifier()?;
            self.parse_declarator_dims(&mut field_type)?;
            self.expect_semicolon("after struct field")?;

            fields.push(Field {
                name: field_name,
                field_type,
            });
        }

        self.expect_rbrace("after struct fields")?;
        self.expect_semicolon("after struct definition")?;

        Ok(AstNode::StructDef {
            name,
            fields,
            location: loc,
        })
    }

    /// Parse function definition: type name(params) { body }
    ///
    /// A `;` in place of the body yields a prototype.
    pub(crate) fn parse_function_definition(&mut self) -> Result<AstNode, ParseError> {
        let return_type = self.parse_type()?;
        let name = self.expect_identifier()?;
        let loc = self.previous_location();

        self.expect_lparen("after function name")?;

        let params = self.parse_parameter_list()?;

        self.expect_rparen("after parameters")?;

        if self.match_token(&Token::Semicolon(self.current_location())) {
            return Ok(AstNode::FunctionDef {
                name,
                params,
                return_type,
                body: None,
                location: loc,
            });
        }

        self.expect_lbrace("before function body")?;

        let body = self.parse_block_statements()?;

        self.expect_rbrace("after function body")?;

        Ok(AstNode::FunctionDef {
            name,
            params,
            return_type,
            body: Some(body),
            location: loc,
        })
    }

    /// Parse parameter list: (type name, type name, ...)
    pub(crate) fn parse_parameter_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();

        if self.check(&Token::RParen(self.current_location())) {
            return Ok(params);
        }

        // Special case: (void) means no parameters in C
        if self.check(&Token::Void(self.current_location()))
            && matches!(self.peek_ahead(1), Some(Token::RParen(_)))
        {
            self.advance(); // consume 'void'
            return Ok(params);
        }

        loop {
            let mut param_type = self.parse_type()?;
            let param_name = self.expect_identifier()?;
            self.parse_declarator_dims(&mut param_type)?;
            params.push(Param {
                name: param_name,
                param_type,
            });

            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }

        Ok(params)
    }

    /// Parse variable declaration including its `;`.
    pub(crate) fn parse_variable_declaration(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let nodes = self.parse_declarators()?;
        self.expect_semicolon("after variable declaration")?;
        Ok(nodes)
    }

    /// Parse `specifier declarator, declarator, ...` without the trailing `;`.
    pub(crate) fn parse_declarators(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let specifier = self.parse_type_specifier()?;
        let mut nodes = Vec::new();

        loop {
            let mut var_type = specifier.clone();
            while self.match_token(&Token::Star(self.current_location())) {
                var_type.pointer_depth += 1;
            }
            let name = self.expect_identifier()?;
            let loc = self.previous_location();
            self.parse_declarator_dims(&mut var_type)?;

            let init = if self.match_token(&Token::Eq(self.current_location())) {
                Some(Box::new(self.parse_initializer()?))
            } else {
                None
            };

            nodes.push(AstNode::VarDecl {
                name,
                var_type,
                init,
                location: loc,
            });

            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }

        Ok(nodes)
    }

    /// Parse an initializer: an assignment expression or a brace list.
    pub(crate) fn parse_initializer(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.current_location();
        if !self.match_token(&Token::LBrace(loc)) {
            return self.parse_expression();
        }

        let mut items = Vec::new();
        while !self.check(&Token::RBrace(self.current_location())) {
            items.push(self.parse_initializer()?);
            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }
        self.expect_rbrace("after initializer list")?;

        Ok(AstNode::InitList {
            items,
            location: loc,
        })
    }

    /// C-style array dimensions after a declarator name: `arr[5][2]`
    pub(crate) fn parse_declarator_dims(&mut self, var_type: &mut Type) -> Result<(), ParseError> {
        while self.match_token(&Token::LBracket(self.current_location())) {
            let dim = self.parse_array_dim()?;
            var_type.array_dims.push(dim);
        }
        Ok(())
    }

    /// Parse the inside of `[...]` after the opening bracket.
    fn parse_array_dim(&mut self) -> Result<Option<usize>, ParseError> {
        if self.match_token(&Token::RBracket(self.current_location())) {
            // Unsized array []
            return Ok(None);
        }

        // For now, require compile-time constant (int literal)
        let size_loc = self.current_location();
        let size_expr = self.parse_expression()?;
        let size = match size_expr {
            AstNode::IntLiteral(n, _) if n > 0 => n as usize,
            _ => {
                return Err(ParseError {
                    message: "Array size must be a positive constant integer".to_string(),
                    location: size_loc,
                });
            }
        };
        self.expect_token(
            &Token::RBracket(self.current_location()),
            "Expected ']' after array size",
        )?;
        Ok(Some(size))
    }

    /// Parse type specifier: [const] base_type
    pub(crate) fn parse_type_specifier(&mut self) -> Result<Type, ParseError> {
        let mut is_const = false;
        if self.match_token(&Token::Const(self.current_location())) {
            is_const = true;
        }

        // Parse base type
        let base = if self.match_token(&Token::Int(self.current_location())) {
            BaseType::Int
        } else if self.match_token(&Token::Long(self.current_location())) {
            // `long int` is accepted as a spelling of `long`
            self.match_token(&Token::Int(self.current_location()));
            BaseType::Long
        } else if self.match_token(&Token::Char(self.current_location())) {
            BaseType::Char
        } else if self.match_token(&Token::Void(self.current_location())) {
            BaseType::Void
        } else if self.match_token(&Token::Struct(self.current_location())) {
            let name = self.expect_identifier()?;
            BaseType::Struct(name)
        } else {
            return Err(ParseError {
                message: format!("Expected type, found {}", self.peek()),
                location: self.current_location(),
            });
        };

        if self.match_token(&Token::Const(self.current_location())) {
            is_const = true;
        }

        let mut ty = Type::new(base);
        ty.is_const = is_const;
        Ok(ty)
    }

    /// Parse type: [const] base_type [*]* [[size]]*
    pub(crate) fn parse_type(&mut self) -> Result<Type, ParseError> {
        let mut ty = self.parse_type_specifier()?;

        while self.match_token(&Token::Star(self.current_location())) {
            ty.pointer_depth += 1;
        }

        while self.match_token(&Token::LBracket(self.current_location())) {
            let dim = self.parse_array_dim()?;
            ty.array_dims.push(dim);
        }

        Ok(ty)
    }
}
