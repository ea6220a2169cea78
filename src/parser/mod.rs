//! Recursive-descent parser for Bloch.
//!
//! Single pass over the token stream with bounded local lookahead. The
//! grammar is all-or-nothing: the first violation aborts parsing with a
//! [`ParseError`] anchored at the offending token.

pub mod ast;

use crate::error::{ParseError, ParseResult, Position};
use crate::lexer::{Token, TokenKind};

use self::ast::{
    Annotation, AnnotationKind, ArraySize, AssignTarget, BinaryOperator, ClassDeclaration,
    ConstructorBody, ConstructorDeclaration, DestructorDeclaration, Expression, FieldDeclaration,
    FunctionDeclaration, ImportDeclaration, MethodDeclaration, PackageDeclaration, Parameter,
    PostfixOperator, PrimitiveType, Program, ShotSpec, Statement, TypeNode, TypeParameter,
    UnaryOperator, Visibility,
};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        // the lexer guarantees a trailing Eof token
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn position(&self) -> Position {
        self.peek().position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {what} but found '{}'", self.describe())))
        }
    }

    fn describe(&self) -> String {
        let token = self.peek();
        if token.kind == TokenKind::Eof {
            "end of input".into()
        } else {
            token.lexeme.clone()
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.position(),
        }
    }

    fn error_at(&self, position: Position, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position,
        }
    }

    // ---- program structure --------------------------------------------

    pub fn parse(mut self) -> ParseResult<Program> {
        let mut program = Program::default();

        if self.check(TokenKind::Package) {
            program.package = Some(self.parse_package()?);
        }

        while self.check(TokenKind::Import) {
            program.imports.push(self.parse_import()?);
        }

        while !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Package) || self.check(TokenKind::Import) {
                return Err(self.error_here(
                    "package and import declarations must precede all other declarations",
                ));
            }

            let annotations = self.parse_annotations()?;

            match self.kind() {
                TokenKind::Function => {
                    let function = self.parse_function(annotations)?;
                    program.functions.push(function);
                }
                TokenKind::Class | TokenKind::Abstract | TokenKind::Static => {
                    let class = self.parse_class(annotations)?;
                    program.classes.push(class);
                }
                _ => {
                    let statement = self.parse_possibly_declared_statement(annotations)?;
                    program.statements.push(statement);
                }
            }
        }

        program.shots = shot_spec(&program);
        Ok(program)
    }

    fn parse_package(&mut self) -> ParseResult<PackageDeclaration> {
        let position = self.position();
        self.expect(TokenKind::Package, "'package'")?;
        let name = self.parse_dotted_path()?;
        self.expect(TokenKind::Semicolon, "';' after package declaration")?;
        Ok(PackageDeclaration { name, position })
    }

    fn parse_import(&mut self) -> ParseResult<ImportDeclaration> {
        let position = self.position();
        self.expect(TokenKind::Import, "'import'")?;
        let path = self.parse_dotted_path()?;
        self.expect(TokenKind::Semicolon, "';' after import declaration")?;
        Ok(ImportDeclaration { path, position })
    }

    fn parse_dotted_path(&mut self) -> ParseResult<String> {
        let mut path = self.expect(TokenKind::Identifier, "a name")?.lexeme;
        while self.eat(TokenKind::Dot) {
            let segment = self.expect(TokenKind::Identifier, "a name after '.'")?;
            path.push('.');
            path.push_str(&segment.lexeme);
        }
        Ok(path)
    }

    // ---- annotations --------------------------------------------------

    fn parse_annotations(&mut self) -> ParseResult<Vec<Annotation>> {
        let mut annotations = vec![];

        while self.check(TokenKind::At) {
            let position = self.position();
            self.advance();
            let name = self.expect(TokenKind::Identifier, "an annotation name after '@'")?;

            let kind = match name.lexeme.as_str() {
                "quantum" => AnnotationKind::Quantum,
                "shots" => AnnotationKind::Shots,
                "tracked" => AnnotationKind::Tracked,
                other => {
                    return Err(self.error_at(position, format!("unknown annotation '@{other}'")))
                }
            };

            let argument = if self.eat(TokenKind::LParen) {
                let literal = self.expect(TokenKind::IntLiteral, "an integer literal")?;
                let value = literal.lexeme.parse::<i64>().map_err(|_| {
                    self.error_at(literal.position, "annotation argument out of range")
                })?;
                self.expect(TokenKind::RParen, "')' after annotation argument")?;
                Some(value)
            } else {
                None
            };

            if kind == AnnotationKind::Shots && argument.is_none() {
                return Err(self.error_at(position, "@shots requires an argument: @shots(N)"));
            }

            annotations.push(Annotation {
                kind,
                argument,
                position,
            });
        }

        Ok(annotations)
    }

    // ---- functions ----------------------------------------------------

    fn parse_function(&mut self, annotations: Vec<Annotation>) -> ParseResult<FunctionDeclaration> {
        let position = self.position();
        self.expect(TokenKind::Function, "'function'")?;
        let name = self.expect(TokenKind::Identifier, "a function name")?.lexeme;
        let parameters = self.parse_parameter_list()?;
        self.expect(TokenKind::Arrow, "'->' before the return type")?;
        let return_type = self.parse_type()?;
        let body = self.parse_block_statements()?;

        Ok(FunctionDeclaration {
            annotations,
            name,
            parameters,
            return_type,
            body,
            position,
        })
    }

    fn parse_parameter_list(&mut self) -> ParseResult<Vec<Parameter>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut parameters = vec![];

        if !self.check(TokenKind::RParen) {
            loop {
                let position = self.position();
                let ty = self.parse_type()?;
                let name = self.expect(TokenKind::Identifier, "a parameter name")?.lexeme;
                parameters.push(Parameter { name, ty, position });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(TokenKind::RParen, "')' after parameters")?;
        Ok(parameters)
    }

    // ---- classes ------------------------------------------------------

    fn parse_class(&mut self, annotations: Vec<Annotation>) -> ParseResult<ClassDeclaration> {
        let position = self.position();
        let mut is_abstract = false;
        let mut is_static = false;

        loop {
            match self.kind() {
                TokenKind::Abstract if !is_abstract => {
                    self.advance();
                    is_abstract = true;
                }
                TokenKind::Static if !is_static => {
                    self.advance();
                    is_static = true;
                }
                _ => break,
            }
        }

        self.expect(TokenKind::Class, "'class'")?;
        let name = self.expect(TokenKind::Identifier, "a class name")?.lexeme;

        let type_parameters = if self.check(TokenKind::Less) {
            self.parse_type_parameters()?
        } else {
            vec![]
        };

        let base = if self.eat(TokenKind::Extends) {
            Some(self.parse_type()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace, "'{' to open the class body")?;

        let mut class = ClassDeclaration {
            annotations,
            is_abstract,
            is_static,
            name: name.clone(),
            type_parameters,
            base,
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            destructor: None,
            position,
        };

        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.parse_member(&mut class)?;
        }

        self.expect(TokenKind::RBrace, "'}' to close the class body")?;
        Ok(class)
    }

    fn parse_type_parameters(&mut self) -> ParseResult<Vec<TypeParameter>> {
        self.expect(TokenKind::Less, "'<'")?;
        let mut parameters = vec![];

        loop {
            let position = self.position();
            let name = self.expect(TokenKind::Identifier, "a type parameter name")?.lexeme;
            let bound = if self.eat(TokenKind::Extends) {
                Some(self.parse_type()?)
            } else {
                None
            };
            parameters.push(TypeParameter {
                name,
                bound,
                position,
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::Greater, "'>' after type parameters")?;
        Ok(parameters)
    }

    fn parse_member(&mut self, class: &mut ClassDeclaration) -> ParseResult<()> {
        let annotations = self.parse_annotations()?;

        let visibility = match self.kind() {
            TokenKind::Public => {
                self.advance();
                Visibility::Public
            }
            TokenKind::Private => {
                self.advance();
                Visibility::Private
            }
            TokenKind::Protected => {
                self.advance();
                Visibility::Protected
            }
            _ => Visibility::default(),
        };

        let mut is_static = false;
        let mut is_final = false;
        let mut is_virtual = false;
        let mut is_override = false;

        loop {
            match self.kind() {
                TokenKind::Static if !is_static => {
                    self.advance();
                    is_static = true;
                }
                TokenKind::Final if !is_final => {
                    self.advance();
                    is_final = true;
                }
                TokenKind::Virtual if !is_virtual => {
                    self.advance();
                    is_virtual = true;
                }
                TokenKind::Override if !is_override => {
                    self.advance();
                    is_override = true;
                }
                _ => break,
            }
        }

        match self.kind() {
            TokenKind::Constructor => {
                if is_static || is_final || is_virtual || is_override {
                    return Err(self.error_here("constructors do not take modifiers"));
                }
                let constructor = self.parse_constructor(visibility, &class.name)?;
                class.constructors.push(constructor);
            }
            TokenKind::Destructor => {
                if is_static || is_final || is_virtual || is_override {
                    return Err(self.error_here("destructors do not take modifiers"));
                }
                let destructor = self.parse_destructor()?;
                if class.destructor.is_some() {
                    return Err(self.error_at(
                        destructor.position,
                        format!("class '{}' already declares a destructor", class.name),
                    ));
                }
                class.destructor = Some(destructor);
            }
            TokenKind::Function => {
                let position = self.position();
                self.advance();
                let name = self.expect(TokenKind::Identifier, "a method name")?.lexeme;
                let parameters = self.parse_parameter_list()?;
                self.expect(TokenKind::Arrow, "'->' before the return type")?;
                let return_type = self.parse_type()?;

                let body = if self.eat(TokenKind::Semicolon) {
                    if !is_virtual {
                        return Err(self.error_at(position, "only virtual methods may omit a body"));
                    }
                    None
                } else {
                    Some(self.parse_block_statements()?)
                };

                class.methods.push(MethodDeclaration {
                    annotations,
                    visibility,
                    is_static,
                    is_virtual,
                    is_override,
                    is_final,
                    name,
                    parameters,
                    return_type,
                    body,
                    position,
                });
            }
            _ => {
                if is_virtual || is_override {
                    return Err(self.error_here("'virtual' and 'override' only apply to methods"));
                }
                let position = self.position();
                let ty = self.parse_type()?;
                let name = self.expect(TokenKind::Identifier, "a field name")?.lexeme;
                let initializer = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.expect(TokenKind::Semicolon, "';' after field declaration")?;

                class.fields.push(FieldDeclaration {
                    annotations,
                    visibility,
                    is_static,
                    is_final,
                    ty,
                    name,
                    initializer,
                    position,
                });
            }
        }

        Ok(())
    }

    fn parse_constructor(
        &mut self,
        visibility: Visibility,
        class_name: &str,
    ) -> ParseResult<ConstructorDeclaration> {
        let position = self.position();
        self.expect(TokenKind::Constructor, "'constructor'")?;
        let parameters = self.parse_parameter_list()?;
        self.expect(TokenKind::Arrow, "'->' before the class name")?;
        let name = self.expect(TokenKind::Identifier, "the class name")?;

        if name.lexeme != class_name {
            return Err(self.error_at(
                name.position,
                format!(
                    "constructor must name its class: expected '{class_name}' but found '{}'",
                    name.lexeme
                ),
            ));
        }

        let body = if self.eat(TokenKind::Assign) {
            self.expect(TokenKind::Default, "'default'")?;
            self.expect(TokenKind::Semicolon, "';' after '= default'")?;
            ConstructorBody::Default
        } else {
            ConstructorBody::Block(self.parse_block_statements()?)
        };

        Ok(ConstructorDeclaration {
            visibility,
            parameters,
            class_name: name.lexeme,
            body,
            position,
        })
    }

    fn parse_destructor(&mut self) -> ParseResult<DestructorDeclaration> {
        let position = self.position();
        self.expect(TokenKind::Destructor, "'destructor'")?;
        self.expect(TokenKind::LParen, "'('")?;
        self.expect(TokenKind::RParen, "')' (destructors take no parameters)")?;
        let body = self.parse_block_statements()?;
        Ok(DestructorDeclaration { body, position })
    }

    // ---- statements ---------------------------------------------------

    fn parse_block_statements(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut statements = vec![];
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let annotations = self.parse_annotations()?;
        self.parse_possibly_declared_statement(annotations)
    }

    /// A statement that may open with annotations (`@tracked`) and/or
    /// `final`, both of which force a variable declaration.
    fn parse_possibly_declared_statement(
        &mut self,
        annotations: Vec<Annotation>,
    ) -> ParseResult<Statement> {
        if !annotations.is_empty() || self.check(TokenKind::Final) {
            let is_final = self.eat(TokenKind::Final);
            return self.parse_variable_declaration(annotations, is_final);
        }

        match self.kind() {
            TokenKind::LBrace => {
                let position = self.position();
                let statements = self.parse_block_statements()?;
                Ok(Statement::Block {
                    statements,
                    position,
                })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => {
                let position = self.position();
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon, "';' after return statement")?;
                Ok(Statement::Return { value, position })
            }
            TokenKind::Echo => {
                let position = self.position();
                self.advance();
                let value = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after echo statement")?;
                Ok(Statement::Echo { value, position })
            }
            TokenKind::Reset => {
                let position = self.position();
                self.advance();
                let qubit = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after reset statement")?;
                Ok(Statement::Reset { qubit, position })
            }
            TokenKind::Measure => {
                let position = self.position();
                self.advance();
                let qubit = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after measure statement")?;
                Ok(Statement::Measure { qubit, position })
            }
            TokenKind::Destroy => {
                let position = self.position();
                self.advance();
                let object = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after destroy statement")?;
                Ok(Statement::Destroy { object, position })
            }
            TokenKind::Super if self.peek_at(1).kind == TokenKind::LParen => {
                let position = self.position();
                self.advance();
                self.advance();
                let arguments = self.parse_argument_list()?;
                self.expect(TokenKind::Semicolon, "';' after super(...)")?;
                Ok(Statement::SuperConstructorCall {
                    arguments,
                    position,
                })
            }
            _ if self.starts_declaration() => self.parse_variable_declaration(vec![], false),
            _ => self.parse_expression_like_statement(),
        }
    }

    /// Bounded lookahead: does the token stream at the cursor read as
    /// `Type Identifier`? Used to split declarations from expressions; the
    /// speculative type scan bails at the first token that cannot continue
    /// a type.
    fn starts_declaration(&mut self) -> bool {
        if self.kind().is_primitive_type() || self.check(TokenKind::Void) {
            return true;
        }
        if !self.check(TokenKind::Identifier) {
            return false;
        }

        let saved = self.pos;
        let is_declaration = self
            .parse_type()
            .map(|_| self.check(TokenKind::Identifier))
            .unwrap_or(false);
        self.pos = saved;
        is_declaration
    }

    fn parse_variable_declaration(
        &mut self,
        annotations: Vec<Annotation>,
        is_final: bool,
    ) -> ParseResult<Statement> {
        let position = self.position();
        let ty = self.parse_type()?;

        let first = self.expect(TokenKind::Identifier, "a variable name")?.lexeme;
        let mut names = vec![first];

        // only plain `qubit` supports multi-declare
        let multi_ok = matches!(
            ty,
            TypeNode::Primitive {
                primitive: PrimitiveType::Qubit,
                ..
            }
        );
        while self.check(TokenKind::Comma) {
            if !multi_ok {
                return Err(self
                    .error_here("only 'qubit' declarations may declare multiple variables"));
            }
            self.advance();
            let name = self.expect(TokenKind::Identifier, "a variable name")?.lexeme;
            names.push(name);
        }

        let initializer = if self.eat(TokenKind::Assign) {
            if names.len() > 1 {
                return Err(self.error_at(position, "multi-declare cannot take an initialiser"));
            }
            Some(self.parse_expression()?)
        } else {
            None
        };

        self.expect(TokenKind::Semicolon, "';' after variable declaration")?;

        Ok(Statement::VariableDeclaration {
            annotations,
            is_final,
            ty,
            names,
            initializer,
            position,
        })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'(' after 'if'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
            position,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        self.expect(TokenKind::While, "'while'")?;
        self.expect(TokenKind::LParen, "'(' after 'while'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let body = Box::new(self.parse_statement()?);

        Ok(Statement::While {
            condition,
            body,
            position,
        })
    }

    fn parse_for(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        self.expect(TokenKind::For, "'for'")?;
        self.expect(TokenKind::LParen, "'(' after 'for'")?;

        let init = if self.eat(TokenKind::Semicolon) {
            None
        } else if self.starts_declaration() {
            Some(Box::new(self.parse_variable_declaration(vec![], false)?))
        } else {
            let statement = self.parse_simple_statement()?;
            self.expect(TokenKind::Semicolon, "';' after for-loop initialiser")?;
            Some(Box::new(statement))
        };

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after for-loop condition")?;

        let update = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.expect(TokenKind::RParen, "')' after for-loop header")?;

        let body = Box::new(self.parse_statement()?);

        Ok(Statement::For {
            init,
            condition,
            update,
            body,
            position,
        })
    }

    /// An assignment or expression without its trailing `;`, as used in
    /// for-loop headers.
    fn parse_simple_statement(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        let expression = self.parse_expression()?;
        Ok(match expression {
            Expression::Assignment { target, value, .. } => Statement::Assignment {
                target,
                value: *value,
                position,
            },
            other => Statement::Expression {
                expression: other,
                position,
            },
        })
    }

    fn parse_expression_like_statement(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        let expression = self.parse_expression()?;

        // statement-level ternary: expr ? stmt : stmt
        if self.check(TokenKind::Question) {
            self.advance();
            let then_branch = Box::new(self.parse_statement()?);
            self.expect(TokenKind::Colon, "':' between ternary arms")?;
            let else_branch = Box::new(self.parse_statement()?);
            return Ok(Statement::Ternary {
                condition: expression,
                then_branch,
                else_branch,
                position,
            });
        }

        self.expect(TokenKind::Semicolon, "';' after statement")?;

        Ok(match expression {
            Expression::Assignment { target, value, .. } => Statement::Assignment {
                target,
                value: *value,
                position,
            },
            other => Statement::Expression {
                expression: other,
                position,
            },
        })
    }

    // ---- expressions --------------------------------------------------

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ParseResult<Expression> {
        let expression = self.parse_logical_or()?;

        if self.check(TokenKind::Assign) {
            let position = self.position();
            self.advance();
            let value = Box::new(self.parse_assignment()?);
            let target = match expression {
                Expression::Variable { name, position } => {
                    AssignTarget::Variable { name, position }
                }
                Expression::MemberAccess {
                    object,
                    field,
                    position,
                } => AssignTarget::Member {
                    object,
                    field,
                    position,
                },
                Expression::Index {
                    array,
                    index,
                    position,
                } => AssignTarget::Index {
                    array,
                    index,
                    position,
                },
                other => {
                    return Err(self.error_at(
                        other.position(),
                        "invalid assignment target; expected a variable, member, or array element",
                    ));
                }
            };
            return Ok(Expression::Assignment {
                target,
                value,
                position,
            });
        }

        Ok(expression)
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_logical_and()?;
        while self.check(TokenKind::OrOr) {
            let position = self.position();
            self.advance();
            let right = self.parse_logical_and()?;
            left = binary(BinaryOperator::Or, left, right, position);
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_bit_or()?;
        while self.check(TokenKind::AndAnd) {
            let position = self.position();
            self.advance();
            let right = self.parse_bit_or()?;
            left = binary(BinaryOperator::And, left, right, position);
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_bit_xor()?;
        while self.check(TokenKind::Pipe) {
            let position = self.position();
            self.advance();
            let right = self.parse_bit_xor()?;
            left = binary(BinaryOperator::BitOr, left, right, position);
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_bit_and()?;
        while self.check(TokenKind::Caret) {
            let position = self.position();
            self.advance();
            let right = self.parse_bit_and()?;
            left = binary(BinaryOperator::BitXor, left, right, position);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_equality()?;
        while self.check(TokenKind::Ampersand) {
            let position = self.position();
            self.advance();
            let right = self.parse_equality()?;
            left = binary(BinaryOperator::BitAnd, left, right, position);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_comparison()?;
        loop {
            let operator = match self.kind() {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(operator, left, right, position);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;
        loop {
            let operator = match self.kind() {
                TokenKind::Less => BinaryOperator::Less,
                TokenKind::LessEqual => BinaryOperator::LessEqual,
                TokenKind::Greater => BinaryOperator::Greater,
                TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_additive()?;
            left = binary(operator, left, right, position);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = match self.kind() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(operator, left, right, position);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = match self.kind() {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                TokenKind::Percent => BinaryOperator::Modulo,
                _ => break,
            };
            let position = self.position();
            self.advance();
            let right = self.parse_unary()?;
            left = binary(operator, left, right, position);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let position = self.position();

        let operator = match self.kind() {
            TokenKind::Minus => Some(UnaryOperator::Negate),
            TokenKind::Bang => Some(UnaryOperator::Not),
            TokenKind::Tilde => Some(UnaryOperator::BitNot),
            _ => None,
        };
        if let Some(operator) = operator {
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expression::Unary {
                operator,
                operand,
                position,
            });
        }

        if self.check(TokenKind::Measure) {
            self.advance();
            let qubit = Box::new(self.parse_unary()?);
            return Ok(Expression::Measure { qubit, position });
        }

        // `(primitive)` opens a cast; any other parenthesis is a grouping
        if self.check(TokenKind::LParen)
            && self.peek_at(1).kind.is_primitive_type()
            && self.peek_at(2).kind == TokenKind::RParen
        {
            self.advance();
            let target = primitive_of(self.advance().kind);
            self.advance();
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expression::Cast {
                target,
                operand,
                position,
            });
        }

        if self.check(TokenKind::New) {
            return self.parse_new();
        }

        self.parse_postfix()
    }

    fn parse_new(&mut self) -> ParseResult<Expression> {
        let position = self.position();
        self.expect(TokenKind::New, "'new'")?;
        let class_name = self.expect(TokenKind::Identifier, "a class name after 'new'")?.lexeme;

        let mut type_args = vec![];
        let mut diamond = false;
        if self.check(TokenKind::Less) {
            self.advance();
            if self.eat(TokenKind::Greater) {
                diamond = true;
            } else {
                loop {
                    type_args.push(self.parse_type()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Greater, "'>' after type arguments")?;
            }
        }

        self.expect(TokenKind::LParen, "'(' after the class name")?;
        let arguments = self.parse_argument_list()?;

        Ok(Expression::New {
            class_name,
            type_args,
            diamond,
            arguments,
            position,
        })
    }

    /// Parses the remainder of an argument list; the opening `(` has been
    /// consumed.
    fn parse_argument_list(&mut self) -> ParseResult<Vec<Expression>> {
        let mut arguments = vec![];
        if !self.check(TokenKind::RParen) {
            loop {
                arguments.push(self.parse_expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')' after arguments")?;
        Ok(arguments)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_primary()?;

        loop {
            match self.kind() {
                TokenKind::Dot => {
                    let position = self.position();
                    self.advance();
                    let name = self.expect(TokenKind::Identifier, "a member name after '.'")?.lexeme;
                    if self.eat(TokenKind::LParen) {
                        let arguments = self.parse_argument_list()?;
                        expression = Expression::MethodCall {
                            object: Box::new(expression),
                            method: name,
                            arguments,
                            position,
                        };
                    } else {
                        expression = Expression::MemberAccess {
                            object: Box::new(expression),
                            field: name,
                            position,
                        };
                    }
                }
                TokenKind::LBracket => {
                    let position = self.position();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']' after index")?;

                    // constant negative indices can never be in bounds
                    if let Expression::Unary {
                        operator: UnaryOperator::Negate,
                        operand,
                        ..
                    } = &index
                    {
                        if matches!(
                            operand.as_ref(),
                            Expression::IntLiteral { .. } | Expression::LongLiteral { .. }
                        ) {
                            return Err(
                                self.error_at(position, "array index cannot be negative")
                            );
                        }
                    }

                    expression = Expression::Index {
                        array: Box::new(expression),
                        index: Box::new(index),
                        position,
                    };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let position = self.position();
                    let operator = if self.check(TokenKind::PlusPlus) {
                        PostfixOperator::Increment
                    } else {
                        PostfixOperator::Decrement
                    };
                    self.advance();
                    let Expression::Variable { name, .. } = expression else {
                        return Err(self.error_at(
                            position,
                            format!(
                                "'{}' only applies to variables",
                                if operator == PostfixOperator::Increment { "++" } else { "--" }
                            ),
                        ));
                    };
                    expression = Expression::Postfix {
                        operator,
                        name,
                        position,
                    };
                }
                _ => break,
            }
        }

        Ok(expression)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let position = self.position();

        match self.kind() {
            TokenKind::IntLiteral => {
                let token = self.advance();
                let value = token.lexeme.parse::<i64>().map_err(|_| {
                    self.error_at(token.position, "integer literal out of range")
                })?;
                Ok(Expression::IntLiteral { value, position })
            }
            TokenKind::LongLiteral => {
                let token = self.advance();
                let value = token.lexeme.parse::<i64>().map_err(|_| {
                    self.error_at(token.position, "long literal out of range")
                })?;
                Ok(Expression::LongLiteral { value, position })
            }
            TokenKind::FloatLiteral => {
                let token = self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    self.error_at(token.position, "malformed float literal")
                })?;
                Ok(Expression::FloatLiteral { value, position })
            }
            TokenKind::BitLiteral => {
                let token = self.advance();
                let value = if token.lexeme == "1" { 1 } else { 0 };
                Ok(Expression::BitLiteral { value, position })
            }
            TokenKind::CharLiteral => {
                let token = self.advance();
                let value = token.lexeme.chars().next().unwrap_or('\0');
                Ok(Expression::CharLiteral { value, position })
            }
            TokenKind::StringLiteral => {
                let token = self.advance();
                Ok(Expression::StringLiteral {
                    value: token.lexeme,
                    position,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::BooleanLiteral {
                    value: true,
                    position,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::BooleanLiteral {
                    value: false,
                    position,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::NullLiteral { position })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expression::This { position })
            }
            TokenKind::Super => {
                self.advance();
                self.expect(TokenKind::Dot, "'.' after 'super'")?;
                let method = self.expect(TokenKind::Identifier, "a method name")?.lexeme;
                self.expect(TokenKind::LParen, "'(' after the method name")?;
                let arguments = self.parse_argument_list()?;
                Ok(Expression::SuperMethodCall {
                    method,
                    arguments,
                    position,
                })
            }
            TokenKind::Identifier => {
                let token = self.advance();
                if self.eat(TokenKind::LParen) {
                    let arguments = self.parse_argument_list()?;
                    Ok(Expression::Call {
                        function: token.lexeme,
                        arguments,
                        position,
                    })
                } else {
                    Ok(Expression::Variable {
                        name: token.lexeme,
                        position,
                    })
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = Box::new(self.parse_expression()?);
                self.expect(TokenKind::RParen, "')' after expression")?;
                Ok(Expression::Grouping { inner, position })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut elements = vec![];
                if !self.check(TokenKind::RBrace) {
                    loop {
                        let element = self.parse_expression()?;
                        if matches!(element, Expression::ArrayLiteral { .. }) {
                            return Err(self.error_at(
                                element.position(),
                                "nested array literals are not allowed",
                            ));
                        }
                        elements.push(element);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace, "'}' after array literal")?;
                Ok(Expression::ArrayLiteral { elements, position })
            }
            _ => Err(self.error_here(format!(
                "expected an expression but found '{}'",
                self.describe()
            ))),
        }
    }

    // ---- types --------------------------------------------------------

    fn parse_type(&mut self) -> ParseResult<TypeNode> {
        let position = self.position();

        let mut ty = match self.kind() {
            TokenKind::Void => {
                self.advance();
                TypeNode::Void { position }
            }
            kind if kind.is_primitive_type() => {
                self.advance();
                TypeNode::Primitive {
                    primitive: primitive_of(kind),
                    position,
                }
            }
            TokenKind::Identifier => {
                let name = self.advance().lexeme;
                let type_args = if self.check(TokenKind::Less) {
                    self.advance();
                    let mut args = vec![];
                    loop {
                        args.push(self.parse_type()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::Greater, "'>' after type arguments")?;
                    args
                } else {
                    vec![]
                };
                TypeNode::Named {
                    name,
                    type_args,
                    position,
                }
            }
            _ => {
                return Err(self.error_here(format!(
                    "expected a type but found '{}'",
                    self.describe()
                )))
            }
        };

        while self.check(TokenKind::LBracket) {
            let position = self.position();
            self.advance();
            let size = if self.check(TokenKind::RBracket) {
                None
            } else if self.check(TokenKind::IntLiteral)
                && self.peek_at(1).kind == TokenKind::RBracket
            {
                let token = self.advance();
                let value = token.lexeme.parse::<usize>().map_err(|_| {
                    self.error_at(token.position, "array size out of range")
                })?;
                Some(ArraySize::Fixed(value))
            } else {
                Some(ArraySize::Expr(Box::new(self.parse_expression()?)))
            };
            self.expect(TokenKind::RBracket, "']' after array size")?;
            ty = TypeNode::Array {
                element: Box::new(ty),
                size,
                position,
            };
        }

        Ok(ty)
    }
}

fn binary(
    operator: BinaryOperator,
    left: Expression,
    right: Expression,
    position: Position,
) -> Expression {
    Expression::Binary {
        operator,
        left: Box::new(left),
        right: Box::new(right),
        position,
    }
}

fn primitive_of(kind: TokenKind) -> PrimitiveType {
    match kind {
        TokenKind::Int => PrimitiveType::Int,
        TokenKind::Long => PrimitiveType::Long,
        TokenKind::Float => PrimitiveType::Float,
        TokenKind::Bit => PrimitiveType::Bit,
        TokenKind::Char => PrimitiveType::Char,
        TokenKind::String => PrimitiveType::String,
        TokenKind::Boolean => PrimitiveType::Boolean,
        TokenKind::Qubit => PrimitiveType::Qubit,
        _ => unreachable!("token kind {kind:?} is not a primitive type"),
    }
}

/// Derive the program's shot spec from `@shots(N)` on `main`, defaulting to
/// a single shot.
fn shot_spec(program: &Program) -> ShotSpec {
    let Some(main) = program.main() else {
        return ShotSpec::default();
    };
    for annotation in &main.annotations {
        if annotation.kind == AnnotationKind::Shots {
            if let Some(count) = annotation.argument {
                return ShotSpec {
                    annotated: true,
                    count: count.max(0) as u64,
                };
            }
        }
    }
    ShotSpec::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> ParseResult<Program> {
        let tokens = Lexer::new(input).lex().expect("lexing failed");
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_parse_function_declaration() {
        let program = parse("function main() -> void { return; }").unwrap();

        assert_eq!(program.functions.len(), 1);
        let main = &program.functions[0];
        assert_eq!(main.name, "main");
        assert!(main.parameters.is_empty());
        assert!(matches!(main.return_type, TypeNode::Void { .. }));
    }

    #[test]
    fn test_parse_shots_annotation() {
        let program = parse("@shots(1024) function main() -> void { }").unwrap();

        assert!(program.shots.annotated);
        assert_eq!(program.shots.count, 1024);
    }

    #[test]
    fn test_parse_qubit_multi_declare() {
        let program = parse("function main() -> void { qubit a, b; }").unwrap();

        let Statement::VariableDeclaration { names, .. } = &program.functions[0].body[0] else {
            panic!("expected a variable declaration");
        };
        assert_eq!(names, &["a", "b"]);
    }

    #[test]
    fn test_parse_rejects_multi_declare_for_int() {
        assert!(parse("function main() -> void { int a, b; }").is_err());
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse("int x = 1 + 2 * 3;").unwrap();

        let Statement::VariableDeclaration {
            initializer: Some(Expression::Binary { operator, right, .. }),
            ..
        } = &program.statements[0]
        else {
            panic!("expected a declaration with a binary initialiser");
        };
        assert_eq!(*operator, BinaryOperator::Add);
        assert!(matches!(
            right.as_ref(),
            Expression::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_measure_expression_and_statement() {
        let program = parse("function main() -> void { qubit q; bit b = measure q; measure q; }")
            .unwrap();

        let body = &program.functions[0].body;
        assert!(matches!(
            body[1],
            Statement::VariableDeclaration {
                initializer: Some(Expression::Measure { .. }),
                ..
            }
        ));
        assert!(matches!(body[2], Statement::Measure { .. }));
    }

    #[test]
    fn test_parse_statement_ternary() {
        let program = parse("function main() -> void { boolean c = true; c ? echo 1; : echo 2; }")
            .unwrap();

        assert!(matches!(
            program.functions[0].body[1],
            Statement::Ternary { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_negative_literal_index() {
        let err = parse("int x = a[-1];").unwrap_err();
        assert!(err.message.contains("negative"));
    }

    #[test]
    fn test_parse_rejects_nested_array_literal() {
        let err = parse("int[] x = {{1, 2}, {3}};").unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn test_parse_cast_vs_grouping() {
        let program = parse("float f = (float) 1; int g = (x);").unwrap();

        assert!(matches!(
            program.statements[0],
            Statement::VariableDeclaration {
                initializer: Some(Expression::Cast { .. }),
                ..
            }
        ));
        assert!(matches!(
            program.statements[1],
            Statement::VariableDeclaration {
                initializer: Some(Expression::Grouping { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_class_with_members() {
        let program = parse(
            "class Counter {\
                private int count = 0;\
                constructor(int count) -> Counter = default;\
                public function bump() -> void { count = count + 1; }\
                destructor() { echo \"gone\"; }\
            }",
        )
        .unwrap();

        let class = &program.classes[0];
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.constructors.len(), 1);
        assert_eq!(class.methods.len(), 1);
        assert!(class.destructor.is_some());
        assert!(matches!(class.constructors[0].body, ConstructorBody::Default));
    }

    #[test]
    fn test_parse_generic_class_and_new_diamond() {
        let program = parse(
            "class Box<T> { private T value; constructor(T value) -> Box = default; }\
             Box<int> b = new Box<>(1);",
        )
        .unwrap();

        assert_eq!(program.classes[0].type_parameters.len(), 1);
        let Statement::VariableDeclaration {
            initializer: Some(Expression::New { diamond, .. }),
            ..
        } = &program.statements[0]
        else {
            panic!("expected a declaration initialised with new");
        };
        assert!(diamond);
    }

    #[test]
    fn test_parse_type_vs_comparison_disambiguation() {
        // `Foo<Bar> x;` is a declaration, `a < b` is a comparison
        let program = parse("class Bar { constructor() -> Bar {} }\
                             class Foo<T> { constructor() -> Foo {} }\
                             Foo<Bar> x = new Foo<>();\
                             boolean y = a < b;")
            .unwrap();

        assert!(matches!(
            program.statements[0],
            Statement::VariableDeclaration { .. }
        ));
        let Statement::VariableDeclaration {
            initializer: Some(Expression::Binary { operator, .. }),
            ..
        } = &program.statements[1]
        else {
            panic!("expected a comparison initialiser");
        };
        assert_eq!(*operator, BinaryOperator::Less);
    }

    #[test]
    fn test_parse_import_order_enforced() {
        let err = parse("int x = 1; import util;").unwrap_err();
        assert!(err.message.contains("precede"));
    }

    #[test]
    fn test_parse_super_constructor_call() {
        let program = parse(
            "class Base { constructor() -> Base {} }\
             class Derived extends Base { constructor() -> Derived { super(); } }",
        )
        .unwrap();

        let ConstructorBody::Block(body) = &program.classes[1].constructors[0].body else {
            panic!("expected a block constructor body");
        };
        assert!(matches!(body[0], Statement::SuperConstructorCall { .. }));
    }

    #[test]
    fn test_parse_fixed_and_dynamic_array_types() {
        let program = parse("bit[4] reg = {0b, 0b, 0b, 0b}; int[] xs = {1, 2};").unwrap();

        let Statement::VariableDeclaration { ty, .. } = &program.statements[0] else {
            panic!("expected a declaration");
        };
        assert!(matches!(
            ty,
            TypeNode::Array {
                size: Some(ArraySize::Fixed(4)),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_postfix_only_on_variables() {
        assert!(parse("function main() -> void { int i = 0; i++; }").is_ok());
        assert!(parse("function main() -> void { (1 + 2)++; }").is_err());
    }
}
