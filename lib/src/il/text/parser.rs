//! Parse the textual format into declarations
//!
//! Nothing is resolved here: type names, labels, argument and local names all stay as written.
//! Resolution against the type graph happens in the loader.

use super::lexer::{tokenize, Token};
use super::ParseError;
use crate::il::{CustomAttribute, FieldAccessFlags, MethodAccessFlags, TypeAccessFlags};
use crate::il::type_graph::TypeKind;
use std::mem;

/// Type as written in the source
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeRef {
    Void,
    Named(String),
    GenericParam { name: String, value_type: bool },
    ByRef(Box<TypeRef>),
    Array(Box<TypeRef>),
    Generic(String, Vec<TypeRef>),
}

#[derive(Debug)]
pub struct TypeDecl {
    pub line: usize,
    pub attributes: Vec<CustomAttribute>,
    pub kind: TypeKind,
    pub access_flags: TypeAccessFlags,

    /// Name as written (top-level types include their namespace)
    pub name: String,
    pub generic_parameters: Vec<String>,
    pub base_type: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub nested_types: Vec<TypeDecl>,
}

#[derive(Debug)]
pub struct FieldDecl {
    pub line: usize,
    pub access_flags: FieldAccessFlags,
    pub ty: TypeRef,
    pub name: String,
}

#[derive(Debug)]
pub struct MethodDecl {
    pub line: usize,
    pub attributes: Vec<CustomAttribute>,
    pub return_attributes: Vec<CustomAttribute>,
    pub access_flags: MethodAccessFlags,
    pub return_type: TypeRef,
    pub name: String,
    pub parameters: Vec<ParameterDecl>,

    /// Missing for abstract methods
    pub body: Option<BodyDecl>,
}

#[derive(Debug)]
pub struct ParameterDecl {
    pub attributes: Vec<CustomAttribute>,
    pub is_out: bool,

    /// Type as written (for `out` parameters, the type pointed to)
    pub ty: TypeRef,
    pub name: String,
    pub has_null_default: bool,
}

#[derive(Debug, Default)]
pub struct BodyDecl {
    pub init_locals: bool,
    pub locals: Vec<(TypeRef, String)>,
    pub items: Vec<BodyItem>,
    pub handlers: Vec<HandlerDecl>,
}

#[derive(Debug)]
pub enum BodyItem {
    Label(usize, String),
    SequencePoint(usize, SequencePointDecl),
    Instruction {
        line: usize,
        mnemonic: String,
        operands: Vec<Token>,
    },
}

#[derive(Debug)]
pub struct SequencePointDecl {
    pub document: String,

    /// `None` for hidden sequence points
    pub lines: Option<(u32, u32, u32, u32)>,
}

#[derive(Debug)]
pub enum HandlerKindDecl {
    Catch(TypeRef),
    Finally,
}

#[derive(Debug)]
pub struct HandlerDecl {
    pub line: usize,
    pub kind: HandlerKindDecl,
    pub try_start: String,
    pub try_end: String,
    pub handler_start: String,
    pub handler_end: Option<String>,
}

/// Tokens of one line, with a read position
pub struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    pub line: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(tokens: &'a [Token], line: usize) -> Cursor<'a> {
        Cursor {
            tokens,
            pos: 0,
            line,
        }
    }

    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    pub fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn expect_done(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected '{}'", token))),
        }
    }

    pub fn is_punct(&self, punct: char) -> bool {
        self.peek() == Some(&Token::Punct(punct))
    }

    pub fn eat_punct(&mut self, punct: char) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, punct: char) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::Punct(p)) if *p == punct => Ok(()),
            Some(other) => Err(self.error(format!("expected '{}' but found '{}'", punct, other))),
            None => Err(self.error(format!("expected '{}'", punct))),
        }
    }

    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(ident)) if ident == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", keyword)))
        }
    }

    pub fn expect_ident(&mut self) -> Result<&'a str, ParseError> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            Some(other) => Err(self.error(format!("expected a name but found '{}'", other))),
            None => Err(self.error("expected a name")),
        }
    }

    pub fn expect_string(&mut self) -> Result<&'a str, ParseError> {
        match self.next() {
            Some(Token::Str(string)) => Ok(string),
            _ => Err(self.error("expected a string literal")),
        }
    }

    pub fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.next() {
            Some(Token::Int(int)) => Ok(*int),
            _ => Err(self.error("expected an integer")),
        }
    }

    /// Parse a type
    ///
    /// ```text,ignore,no_run
    /// void | Name | Name<T1, T2> | !T | !T:struct | T& | T[]
    /// ```
    pub fn parse_type(&mut self) -> Result<TypeRef, ParseError> {
        let name = self.expect_ident()?;
        let mut ty = if name == "void" {
            TypeRef::Void
        } else if let Some(param) = name.strip_prefix('!') {
            let name = param.trim_start_matches('!').to_owned();
            let value_type = if self.is_punct(':')
                && self.peek_nth(1) == Some(&Token::Ident(String::from("struct")))
            {
                self.pos += 2;
                true
            } else {
                false
            };
            TypeRef::GenericParam { name, value_type }
        } else if self.eat_punct('<') {
            let mut arguments = vec![self.parse_type()?];
            while self.eat_punct(',') {
                arguments.push(self.parse_type()?);
            }
            self.expect_punct('>')?;
            TypeRef::Generic(name.to_owned(), arguments)
        } else {
            TypeRef::Named(name.to_owned())
        };

        loop {
            if self.eat_punct('&') {
                ty = TypeRef::ByRef(Box::new(ty));
            } else if self.is_punct('[') && self.peek_nth(1) == Some(&Token::Punct(']')) {
                self.pos += 2;
                ty = TypeRef::Array(Box::new(ty));
            } else {
                return Ok(ty);
            }
        }
    }

    /// Parse a comma separated list of types in parentheses
    pub fn parse_type_list(&mut self) -> Result<Vec<TypeRef>, ParseError> {
        self.expect_punct('(')?;
        let mut types = vec![];
        if !self.eat_punct(')') {
            loop {
                types.push(self.parse_type()?);
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        Ok(types)
    }

    /// Parse one attribute, after the opening `[`
    ///
    /// Arguments are separated by commas. Each argument is the concatenation of its tokens, so
    /// `Arguments|ReturnValues` is a single argument.
    fn parse_attribute_body(&mut self) -> Result<CustomAttribute, ParseError> {
        let name = self.expect_ident()?.to_owned();
        let mut arguments = vec![];
        if self.eat_punct('(') {
            let mut argument = String::new();
            loop {
                match self.next() {
                    Some(Token::Punct(')')) => break,
                    Some(Token::Punct(',')) => arguments.push(mem::take(&mut argument)),
                    Some(Token::Str(string)) => argument.push_str(string),
                    Some(token) => argument.push_str(&token.to_string()),
                    None => return Err(self.error("unterminated attribute arguments")),
                }
            }
            if !argument.is_empty() || !arguments.is_empty() {
                arguments.push(argument);
            }
        }
        self.expect_punct(']')?;
        Ok(CustomAttribute::with_arguments(name, arguments))
    }

    /// Parse any number of `[Attribute]`s
    pub fn parse_attributes(&mut self) -> Result<Vec<CustomAttribute>, ParseError> {
        let mut attributes = vec![];
        while self.is_punct('[') && self.peek_nth(1) != Some(&Token::Punct(']')) {
            self.pos += 1;
            attributes.push(self.parse_attribute_body()?);
        }
        Ok(attributes)
    }

    /// Parse a label operand list (`switch (L1, L2)`)
    pub fn parse_label_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_punct('(')?;
        let mut labels = vec![];
        if !self.eat_punct(')') {
            loop {
                labels.push(self.expect_ident()?.to_owned());
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        Ok(labels)
    }
}

/// Parse a whole module into type declarations
pub fn parse_module(source: &str) -> Result<Vec<TypeDecl>, ParseError> {
    let mut lines = vec![];
    for (idx, line) in source.lines().enumerate() {
        let tokens = tokenize(line, idx + 1)?;
        if !tokens.is_empty() {
            lines.push((idx + 1, tokens));
        }
    }

    let mut parser = Parser {
        lines,
        pos: 0,
        document: None,
    };
    parser.parse_types()
}

struct Parser {
    lines: Vec<(usize, Vec<Token>)>,
    pos: usize,

    /// Document set by the latest `.document` directive
    document: Option<String>,
}

impl Parser {
    fn next_line(&mut self) -> Option<(usize, Vec<Token>)> {
        let line = self.lines.get_mut(self.pos)?;
        self.pos += 1;
        Some((line.0, mem::take(&mut line.1)))
    }

    fn last_line(&self) -> usize {
        self.lines.last().map_or(0, |(line, _)| *line)
    }

    fn parse_document(&mut self, cursor: &mut Cursor<'_>) -> Result<(), ParseError> {
        self.document = Some(cursor.expect_string()?.to_owned());
        cursor.expect_done()
    }

    fn parse_types(&mut self) -> Result<Vec<TypeDecl>, ParseError> {
        let mut types = vec![];
        let mut attributes = vec![];
        while let Some((line, tokens)) = self.next_line() {
            let mut cursor = Cursor::new(&tokens, line);
            match cursor.peek() {
                Some(Token::Punct('[')) => {
                    attributes.extend(cursor.parse_attributes()?);
                    cursor.expect_done()?;
                }
                Some(Token::Ident(directive)) if directive == ".document" => {
                    cursor.next();
                    self.parse_document(&mut cursor)?;
                }
                Some(Token::Ident(directive)) if type_kind(directive).is_some() => {
                    let decl = self.parse_type(&mut cursor, mem::take(&mut attributes))?;
                    types.push(decl);
                }
                _ => return Err(cursor.error("expected a type declaration")),
            }
        }
        if !attributes.is_empty() {
            return Err(ParseError::new(
                self.last_line(),
                "attributes are not followed by a declaration",
            ));
        }
        Ok(types)
    }

    /// Parse a type declaration, from its header to the matching `.end`
    ///
    /// ```text,ignore,no_run
    /// .class public Name<T> : Base implements I1, I2
    /// ```
    fn parse_type(
        &mut self,
        header: &mut Cursor<'_>,
        attributes: Vec<CustomAttribute>,
    ) -> Result<TypeDecl, ParseError> {
        let line = header.line;
        let kind = match header.next() {
            Some(Token::Ident(directive)) => type_kind(directive),
            _ => None,
        }
        .ok_or_else(|| header.error("expected a type declaration"))?;

        let mut access_flags = TypeAccessFlags::empty();
        let name = loop {
            let word = header.expect_ident()?;
            match TypeAccessFlags::from_keyword(word) {
                Some(flags) => access_flags |= flags,
                None => break word.to_owned(),
            }
        };

        let mut generic_parameters = vec![];
        if header.eat_punct('<') {
            loop {
                let param = header.expect_ident()?;
                generic_parameters.push(param.trim_start_matches('!').to_owned());
                if header.eat_punct('>') {
                    break;
                }
                header.expect_punct(',')?;
            }
        }

        let base_type = if header.eat_punct(':') {
            Some(header.parse_type()?)
        } else {
            None
        };

        let mut interfaces = vec![];
        if header.eat_keyword("implements") {
            interfaces.push(header.parse_type()?);
            while header.eat_punct(',') {
                interfaces.push(header.parse_type()?);
            }
        }
        header.expect_done()?;

        let mut decl = TypeDecl {
            line,
            attributes,
            kind,
            access_flags,
            name,
            generic_parameters,
            base_type,
            interfaces,
            fields: vec![],
            methods: vec![],
            nested_types: vec![],
        };

        let mut attributes = vec![];
        while let Some((line, tokens)) = self.next_line() {
            let mut cursor = Cursor::new(&tokens, line);
            let directive = match cursor.peek() {
                Some(Token::Punct('[')) => {
                    attributes.extend(cursor.parse_attributes()?);
                    cursor.expect_done()?;
                    continue;
                }
                Some(Token::Ident(directive)) => directive.as_str(),
                _ => return Err(cursor.error("expected a member declaration")),
            };
            match directive {
                ".end" => {
                    cursor.next();
                    cursor.expect_done()?;
                    if !attributes.is_empty() {
                        return Err(cursor.error("attributes are not followed by a declaration"));
                    }
                    return Ok(decl);
                }
                ".document" => {
                    cursor.next();
                    self.parse_document(&mut cursor)?;
                }
                ".field" => {
                    cursor.next();
                    if !attributes.is_empty() {
                        return Err(cursor.error("fields do not take attributes"));
                    }
                    decl.fields.push(parse_field(&mut cursor)?);
                }
                ".method" => {
                    cursor.next();
                    let method = self.parse_method(&mut cursor, mem::take(&mut attributes))?;
                    decl.methods.push(method);
                }
                directive if type_kind(directive).is_some() => {
                    let nested = self.parse_type(&mut cursor, mem::take(&mut attributes))?;
                    decl.nested_types.push(nested);
                }
                _ => return Err(cursor.error(format!("unexpected '{}'", directive))),
            }
        }

        Err(ParseError::new(line, format!("missing '.end' for '{}'", decl.name)))
    }

    /// Parse a method declaration, from its header to the matching `.end`
    ///
    /// ```text,ignore,no_run
    /// .method public [return: AllowNull] string Name([AllowNull] string a, out string b)
    /// ```
    fn parse_method(
        &mut self,
        header: &mut Cursor<'_>,
        mut attributes: Vec<CustomAttribute>,
    ) -> Result<MethodDecl, ParseError> {
        let line = header.line;
        let mut access_flags = MethodAccessFlags::empty();
        let mut return_attributes = vec![];

        // Modifiers and attributes, in any order, up to the return type
        loop {
            if header.is_punct('[') {
                header.next();
                if header.peek() == Some(&Token::Ident(String::from("return")))
                    && header.peek_nth(1) == Some(&Token::Punct(':'))
                {
                    header.next();
                    header.next();
                    return_attributes.push(header.parse_attribute_body()?);
                } else {
                    attributes.push(header.parse_attribute_body()?);
                }
                continue;
            }
            match header.peek() {
                Some(Token::Ident(word)) => match MethodAccessFlags::from_keyword(word) {
                    Some(flags) => {
                        access_flags |= flags;
                        header.next();
                    }
                    None => break,
                },
                _ => return Err(header.error("expected a return type")),
            }
        }

        let return_type = header.parse_type()?;
        let name = header.expect_ident()?.to_owned();
        let parameters = parse_parameters(header)?;
        header.expect_done()?;

        let mut body = BodyDecl::default();
        while let Some((line, tokens)) = self.next_line() {
            let mut cursor = Cursor::new(&tokens, line);
            match cursor.peek() {
                Some(Token::Ident(directive)) if directive == ".end" => {
                    cursor.next();
                    cursor.expect_done()?;
                    let body = if access_flags.contains(MethodAccessFlags::ABSTRACT) {
                        if !body.items.is_empty() {
                            return Err(ParseError::new(line, "abstract method with a body"));
                        }
                        None
                    } else {
                        Some(body)
                    };
                    return Ok(MethodDecl {
                        line: header.line,
                        attributes,
                        return_attributes,
                        access_flags,
                        return_type,
                        name,
                        parameters,
                        body,
                    });
                }
                _ => self.parse_body_line(&mut cursor, &mut body)?,
            }
        }

        Err(ParseError::new(line, format!("missing '.end' for '{}'", name)))
    }

    fn parse_body_line(
        &mut self,
        cursor: &mut Cursor<'_>,
        body: &mut BodyDecl,
    ) -> Result<(), ParseError> {
        let line = cursor.line;
        let first = match cursor.peek() {
            Some(Token::Ident(first)) => first.as_str(),
            _ => return Err(cursor.error("expected an instruction")),
        };

        match first {
            ".document" => {
                cursor.next();
                self.parse_document(cursor)
            }
            ".locals" => {
                cursor.next();
                body.init_locals |= cursor.eat_keyword("init");
                cursor.expect_punct('(')?;
                if !cursor.eat_punct(')') {
                    loop {
                        let ty = cursor.parse_type()?;
                        let name = cursor.expect_ident()?.to_owned();
                        body.locals.push((ty, name));
                        if cursor.eat_punct(')') {
                            break;
                        }
                        cursor.expect_punct(',')?;
                    }
                }
                cursor.expect_done()
            }
            ".line" => {
                cursor.next();
                let document = self
                    .document
                    .clone()
                    .ok_or_else(|| cursor.error("'.line' without a '.document'"))?;
                let lines = if cursor.eat_keyword("hidden") {
                    None
                } else {
                    let start_line = expect_u32(cursor)?;
                    let start_column = if cursor.is_done() { 0 } else { expect_u32(cursor)? };
                    let end_line = if cursor.is_done() { start_line } else { expect_u32(cursor)? };
                    let end_column = if cursor.is_done() { 0 } else { expect_u32(cursor)? };
                    Some((start_line, start_column, end_line, end_column))
                };
                cursor.expect_done()?;
                body.items.push(BodyItem::SequencePoint(
                    line,
                    SequencePointDecl { document, lines },
                ));
                Ok(())
            }
            ".try" => {
                cursor.next();
                let try_start = cursor.expect_ident()?.to_owned();
                cursor.expect_keyword("to")?;
                let try_end = cursor.expect_ident()?.to_owned();
                let kind = if cursor.eat_keyword("catch") {
                    HandlerKindDecl::Catch(cursor.parse_type()?)
                } else {
                    cursor.expect_keyword("finally")?;
                    HandlerKindDecl::Finally
                };
                cursor.expect_keyword("handler")?;
                let handler_start = cursor.expect_ident()?.to_owned();
                let handler_end = if cursor.eat_keyword("to") {
                    Some(cursor.expect_ident()?.to_owned())
                } else {
                    None
                };
                cursor.expect_done()?;
                body.handlers.push(HandlerDecl {
                    line,
                    kind,
                    try_start,
                    try_end,
                    handler_start,
                    handler_end,
                });
                Ok(())
            }
            _ => {
                // Optional label, then an optional instruction
                if cursor.peek_nth(1) == Some(&Token::Punct(':')) {
                    let label = cursor.expect_ident()?.to_owned();
                    cursor.next();
                    body.items.push(BodyItem::Label(line, label));
                    if cursor.is_done() {
                        return Ok(());
                    }
                }
                let mnemonic = cursor.expect_ident()?.to_owned();
                let mut operands = vec![];
                while let Some(token) = cursor.next() {
                    operands.push(token.clone());
                }
                body.items.push(BodyItem::Instruction {
                    line,
                    mnemonic,
                    operands,
                });
                Ok(())
            }
        }
    }
}

fn type_kind(directive: &str) -> Option<TypeKind> {
    match directive {
        ".class" => Some(TypeKind::Class),
        ".interface" => Some(TypeKind::Interface),
        ".struct" => Some(TypeKind::ValueType),
        _ => None,
    }
}

fn expect_u32(cursor: &mut Cursor<'_>) -> Result<u32, ParseError> {
    let int = cursor.expect_int()?;
    u32::try_from(int).map_err(|_| cursor.error(format!("'{}' is out of range", int)))
}

/// Parse `.field [static] [public|private] Type name`
fn parse_field(cursor: &mut Cursor<'_>) -> Result<FieldDecl, ParseError> {
    let mut access_flags = FieldAccessFlags::empty();
    loop {
        let flags = match cursor.peek() {
            Some(Token::Ident(word)) if word == "static" => FieldAccessFlags::STATIC,
            Some(Token::Ident(word)) if word == "public" => FieldAccessFlags::PUBLIC,
            Some(Token::Ident(word)) if word == "private" => FieldAccessFlags::PRIVATE,
            _ => break,
        };
        access_flags |= flags;
        cursor.next();
    }
    let ty = cursor.parse_type()?;
    let name = cursor.expect_ident()?.to_owned();
    cursor.expect_done()?;
    Ok(FieldDecl {
        line: cursor.line,
        access_flags,
        ty,
        name,
    })
}

/// Parse `([Attr] [out] Type name [= null], ...)`
fn parse_parameters(cursor: &mut Cursor<'_>) -> Result<Vec<ParameterDecl>, ParseError> {
    cursor.expect_punct('(')?;
    let mut parameters = vec![];
    if cursor.eat_punct(')') {
        return Ok(parameters);
    }
    loop {
        let attributes = cursor.parse_attributes()?;
        let is_out = cursor.eat_keyword("out");
        let ty = cursor.parse_type()?;
        let name = cursor.expect_ident()?.to_owned();
        let has_null_default = if cursor.eat_punct('=') {
            cursor.expect_keyword("null")?;
            true
        } else {
            false
        };
        parameters.push(ParameterDecl {
            attributes,
            is_out,
            ty,
            name,
            has_null_default,
        });
        if cursor.eat_punct(')') {
            return Ok(parameters);
        }
        cursor.expect_punct(',')?;
    }
}
