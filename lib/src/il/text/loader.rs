//! Resolve parsed declarations against a type graph
//!
//! Loading happens in passes, so that declarations can refer to each other regardless of order:
//!
//!   1. declare every type (nested types included)
//!   2. link base types and interfaces
//!   3. declare fields and method signatures
//!   4. build method bodies, now that every member an instruction may refer to exists
//!

use super::lexer::Token;
use super::parser::{
    parse_module, BodyDecl, BodyItem, Cursor, HandlerKindDecl, MethodDecl, TypeDecl, TypeRef,
};
use super::ParseError;
use crate::il::code::{
    BranchForm, BranchKind, ExceptionHandler, HandlerKind, InstrId, MethodBody, Op, Variable,
};
use crate::il::debug_info::{Scope, SequencePoint};
use crate::il::type_graph::{
    FieldData, MethodData, ParameterData, SystemLibrary, TypeData, TypeGraph, TypeKind,
};
use crate::il::{FullName, Module, TypeSig};
use std::collections::HashMap;

/// Parse a module and add its types to the graph
pub fn load_module<'g>(
    graph: &TypeGraph<'g>,
    system: &SystemLibrary<'g>,
    source: &str,
) -> Result<Module<'g>, ParseError> {
    let decls = parse_module(source)?;
    let loader = Loader { graph, system };

    let mut declared = vec![];
    for decl in &decls {
        loader.declare_type(decl, None, &mut declared)?;
    }

    for &(decl, ty) in &declared {
        loader.link_supertypes(decl, ty)?;
    }

    let mut bodies = vec![];
    for &(decl, ty) in &declared {
        loader.declare_members(decl, ty, &mut bodies)?;
    }

    for (decl, method) in bodies {
        if let Some(body) = &decl.body {
            let body = loader.build_body(decl, body, method)?;
            *method.body.borrow_mut() = Some(body);
        }
    }

    Ok(Module {
        types: declared.into_iter().map(|(_, ty)| ty).collect(),
    })
}

struct Loader<'a, 'g> {
    graph: &'a TypeGraph<'g>,
    system: &'a SystemLibrary<'g>,
}

impl<'a, 'g> Loader<'a, 'g> {
    fn declare_type<'d>(
        &self,
        decl: &'d TypeDecl,
        declaring_type: Option<&'g TypeData<'g>>,
        declared: &mut Vec<(&'d TypeDecl, &'g TypeData<'g>)>,
    ) -> Result<(), ParseError> {
        let (namespace, name) = match (declaring_type, decl.name.rfind('.')) {
            (None, Some(dot)) => (&decl.name[..dot], &decl.name[dot + 1..]),
            _ => ("", decl.name.as_str()),
        };
        let data = TypeData {
            generic_parameters: decl.generic_parameters.clone(),
            attributes: decl.attributes.clone(),
            ..TypeData::new(namespace, name, decl.kind, decl.access_flags, declaring_type)
        };

        let full_name = data.full_name();
        if self.graph.lookup_type(&full_name).is_some() {
            return Err(ParseError::new(
                decl.line,
                format!("type '{}' is already declared", full_name),
            ));
        }
        let ty = self.graph.add_type(data);
        declared.push((decl, ty));

        for nested in &decl.nested_types {
            self.declare_type(nested, Some(ty), declared)?;
        }
        Ok(())
    }

    fn link_supertypes(&self, decl: &TypeDecl, ty: &'g TypeData<'g>) -> Result<(), ParseError> {
        let base_type = match &decl.base_type {
            Some(base_type) => Some(self.resolve_definition(base_type, Some(ty), decl.line)?),
            None => match decl.kind {
                TypeKind::Class => Some(self.system.classes.object),
                TypeKind::ValueType => Some(self.system.classes.value_type),
                TypeKind::Interface => None,
            },
        };
        ty.base_type.set(base_type);

        for interface in &decl.interfaces {
            let interface = self.resolve_definition(interface, Some(ty), decl.line)?;
            if !interface.is_interface() {
                return Err(ParseError::new(
                    decl.line,
                    format!("'{}' is not an interface", interface.full_name()),
                ));
            }
            ty.interfaces.push(interface);
        }
        Ok(())
    }

    fn declare_members<'d>(
        &self,
        decl: &'d TypeDecl,
        ty: &'g TypeData<'g>,
        bodies: &mut Vec<(&'d MethodDecl, &'g MethodData<'g>)>,
    ) -> Result<(), ParseError> {
        for field in &decl.fields {
            if ty.find_field(&field.name).is_some() {
                return Err(ParseError::new(
                    field.line,
                    format!("field '{}' is already declared", field.name),
                ));
            }
            self.graph.add_field(FieldData {
                declaring_type: ty,
                name: field.name.clone(),
                ty: self.resolve(&field.ty, Some(ty), field.line)?,
                access_flags: field.access_flags,
            });
        }

        for method_decl in &decl.methods {
            let mut parameters = vec![];
            for parameter in &method_decl.parameters {
                let mut param_ty = self.resolve(&parameter.ty, Some(ty), method_decl.line)?;
                if parameter.is_out {
                    param_ty = TypeSig::ByRef(Box::new(param_ty));
                }
                parameters.push(ParameterData {
                    is_out: parameter.is_out,
                    has_null_default: parameter.has_null_default,
                    attributes: parameter.attributes.clone(),
                    ..ParameterData::new(parameter.name.clone(), param_ty)
                });
            }

            let method = MethodData {
                return_attributes: method_decl.return_attributes.clone(),
                attributes: method_decl.attributes.clone(),
                ..MethodData::new(
                    ty,
                    method_decl.name.clone(),
                    method_decl.access_flags,
                    self.resolve(&method_decl.return_type, Some(ty), method_decl.line)?,
                    parameters,
                )
            };
            if ty.methods.iter().any(|other| other.has_same_signature(&method)) {
                return Err(ParseError::new(
                    method_decl.line,
                    format!("method '{}' is already declared", method.full_name()),
                ));
            }
            bodies.push((method_decl, self.graph.add_method(method)));
        }
        Ok(())
    }

    /// Find a type by name, trying the enclosing types and namespace of `scope` first
    fn lookup_type(
        &self,
        name: &str,
        scope: Option<&'g TypeData<'g>>,
        line: usize,
    ) -> Result<&'g TypeData<'g>, ParseError> {
        let classes = &self.system.classes;
        match name {
            "object" => return Ok(classes.object),
            "string" => return Ok(classes.string),
            "bool" => return Ok(classes.boolean),
            "int" | "int32" => return Ok(classes.int32),
            "long" | "int64" => return Ok(classes.int64),
            _ => (),
        }

        let mut next_scope = scope;
        while let Some(enclosing) = next_scope {
            let nested_name = format!("{}/{}", enclosing.full_name(), name);
            if let Some(ty) = self.graph.lookup_type(&nested_name) {
                return Ok(ty);
            }
            if enclosing.declaring_type.is_none() && !enclosing.namespace.is_empty() {
                let sibling_name = format!("{}.{}", enclosing.namespace, name);
                if let Some(ty) = self.graph.lookup_type(&sibling_name) {
                    return Ok(ty);
                }
            }
            next_scope = enclosing.declaring_type;
        }

        self.graph
            .lookup_type(name)
            .ok_or_else(|| ParseError::new(line, format!("unknown type '{}'", name)))
    }

    fn resolve(
        &self,
        ty: &TypeRef,
        scope: Option<&'g TypeData<'g>>,
        line: usize,
    ) -> Result<TypeSig<'g>, ParseError> {
        Ok(match ty {
            TypeRef::Void => TypeSig::Void,
            TypeRef::Named(name) => TypeSig::Named(self.lookup_type(name, scope, line)?),
            TypeRef::GenericParam { name, value_type } => TypeSig::GenericParam {
                name: name.clone(),
                value_type: *value_type,
            },
            TypeRef::ByRef(element) => TypeSig::ByRef(Box::new(self.resolve(element, scope, line)?)),
            TypeRef::Array(element) => TypeSig::Array(Box::new(self.resolve(element, scope, line)?)),
            TypeRef::Generic(name, arguments) => {
                let definition = self.lookup_type(name, scope, line)?;
                if definition.generic_parameters.len() != arguments.len() {
                    return Err(ParseError::new(
                        line,
                        format!(
                            "'{}' expects {} type arguments",
                            name,
                            definition.generic_parameters.len()
                        ),
                    ));
                }
                let arguments = arguments
                    .iter()
                    .map(|argument| self.resolve(argument, scope, line))
                    .collect::<Result<Vec<_>, _>>()?;
                TypeSig::GenericInstance(definition, arguments)
            }
        })
    }

    /// Resolve a type that must be a named type or a generic instantiation
    fn resolve_definition(
        &self,
        ty: &TypeRef,
        scope: Option<&'g TypeData<'g>>,
        line: usize,
    ) -> Result<&'g TypeData<'g>, ParseError> {
        self.resolve(ty, scope, line)?
            .definition()
            .ok_or_else(|| ParseError::new(line, "expected a named type"))
    }

    fn build_body(
        &self,
        decl: &MethodDecl,
        body_decl: &BodyDecl,
        method: &'g MethodData<'g>,
    ) -> Result<MethodBody<'g>, ParseError> {
        let scope = Some(method.declaring_type);
        let mut body = MethodBody::new();
        body.init_locals = body_decl.init_locals;

        let mut local_names = HashMap::new();
        for (ty, name) in &body_decl.locals {
            let slot = body.variables.len() as u16;
            if local_names.insert(name.as_str(), slot).is_some() {
                return Err(ParseError::new(
                    decl.line,
                    format!("local '{}' is already declared", name),
                ));
            }
            body.variables.push(Variable {
                name: name.clone(),
                ty: self.resolve(ty, scope, decl.line)?,
            });
        }

        // Labels name the instruction that follows them (or the end of the body)
        let mut labels: HashMap<&str, Option<InstrId>> = HashMap::new();
        let mut pending_labels = vec![];
        let mut instruction_ids = vec![];
        for item in &body_decl.items {
            match item {
                BodyItem::Label(line, label) => {
                    if labels.contains_key(label.as_str()) || pending_labels.contains(&label.as_str()) {
                        return Err(ParseError::new(
                            *line,
                            format!("label '{}' is already defined", label),
                        ));
                    }
                    pending_labels.push(label.as_str());
                }
                BodyItem::Instruction { .. } => {
                    let id = body.fresh_id();
                    for label in pending_labels.drain(..) {
                        labels.insert(label, Some(id));
                    }
                    instruction_ids.push(id);
                }
                BodyItem::SequencePoint(..) => (),
            }
        }
        for label in pending_labels {
            labels.insert(label, None);
        }

        let mut ids = instruction_ids.into_iter();

        let context = BodyContext {
            loader: self,
            method,
            labels: &labels,
            local_names: &local_names,
        };
        let mut pending_sequence_points = vec![];
        for item in &body_decl.items {
            match item {
                BodyItem::Label(..) => (),
                BodyItem::SequencePoint(line, sequence_point) => {
                    pending_sequence_points.push((*line, sequence_point));
                }
                BodyItem::Instruction {
                    line,
                    mnemonic,
                    operands,
                } => {
                    let id = ids
                        .next()
                        .ok_or_else(|| ParseError::new(*line, "instruction count changed"))?;
                    let mut cursor = Cursor::new(operands, *line);
                    let op = context.parse_op(mnemonic, &mut cursor)?;
                    cursor.expect_done()?;
                    body.push_with_id(id, op);

                    for (_, sequence_point) in pending_sequence_points.drain(..) {
                        body.debug_info.sequence_points.push(match sequence_point.lines {
                            None => SequencePoint::hidden(id, sequence_point.document.clone()),
                            Some((start_line, start_column, end_line, end_column)) => {
                                SequencePoint {
                                    instruction: id,
                                    document: sequence_point.document.clone(),
                                    start_line,
                                    start_column,
                                    end_line,
                                    end_column,
                                }
                            }
                        });
                    }
                }
            }
        }
        if let Some((line, _)) = pending_sequence_points.first() {
            return Err(ParseError::new(
                *line,
                "'.line' is not followed by an instruction",
            ));
        }

        for handler in &body_decl.handlers {
            let kind = match &handler.kind {
                HandlerKindDecl::Catch(ty) => {
                    HandlerKind::Catch(self.resolve_definition(ty, scope, handler.line)?)
                }
                HandlerKindDecl::Finally => HandlerKind::Finally,
            };
            let label = |name: &String| context.label(name, handler.line);
            body.exception_handlers.push(ExceptionHandler {
                kind,
                try_start: label(&handler.try_start)?,
                try_end: label(&handler.try_end)?,
                handler_start: label(&handler.handler_start)?,
                handler_end: match &handler.handler_end {
                    Some(name) => context.label_or_end(name, handler.line)?,
                    None => None,
                },
            });
        }

        if !body.debug_info.sequence_points.is_empty() {
            if let (Some(first), Some(last)) = (body.instructions.first(), body.instructions.last()) {
                body.debug_info.scope = Some(Scope {
                    start: first.id,
                    end: last.id,
                    variables: (0..body.variables.len() as u16).collect(),
                });
            }
        }

        body.check_references()
            .map_err(|err| ParseError::new(decl.line, err.to_string()))?;
        Ok(body)
    }
}

/// Everything needed to resolve instruction operands in one body
struct BodyContext<'l, 'a, 'g> {
    loader: &'l Loader<'a, 'g>,
    method: &'g MethodData<'g>,
    labels: &'l HashMap<&'l str, Option<InstrId>>,
    local_names: &'l HashMap<&'l str, u16>,
}

impl<'l, 'a, 'g> BodyContext<'l, 'a, 'g> {
    fn label_or_end(&self, name: &str, line: usize) -> Result<Option<InstrId>, ParseError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::new(line, format!("unknown label '{}'", name)))
    }

    fn label(&self, name: &str, line: usize) -> Result<InstrId, ParseError> {
        self.label_or_end(name, line)?.ok_or_else(|| {
            ParseError::new(line, format!("label '{}' is not followed by an instruction", name))
        })
    }

    fn parse_op(&self, mnemonic: &str, operands: &mut Cursor<'_>) -> Result<Op<'g>, ParseError> {
        let line = operands.line;
        let branch = |kind: BranchKind, operands: &mut Cursor<'_>| -> Result<Op<'g>, ParseError> {
            let form = if mnemonic.ends_with(".s") {
                BranchForm::Short
            } else {
                BranchForm::Long
            };
            let target = self.label(operands.expect_ident()?, line)?;
            Ok(Op::Branch(kind, form, target))
        };

        Ok(match mnemonic {
            "nop" => Op::Nop,
            "ldnull" => Op::LdNull,
            "ldstr" => Op::LdStr(operands.expect_string()?.to_owned()),
            "ldc.i4" | "ldc.i4.s" => {
                let value = operands.expect_int()?;
                Op::LdcI4(i32::try_from(value).map_err(|_| {
                    ParseError::new(line, format!("'{}' does not fit in 32 bits", value))
                })?)
            }
            "ldc.i4.m1" | "ldc.i4.M1" => Op::LdcI4(-1),
            "ldarg" | "ldarg.s" => Op::LdArg(self.argument(operands)?),
            "ldarga" | "ldarga.s" => Op::LdArgA(self.argument(operands)?),
            "starg" | "starg.s" => Op::StArg(self.argument(operands)?),
            "ldloc" | "ldloc.s" => Op::LdLoc(self.local(operands)?),
            "ldloca" | "ldloca.s" => Op::LdLocA(self.local(operands)?),
            "stloc" | "stloc.s" => Op::StLoc(self.local(operands)?),
            "dup" => Op::Dup,
            "pop" => Op::Pop,
            "ceq" => Op::Ceq,
            "add" => Op::Add,
            "sub" => Op::Sub,
            "ldind.ref" => Op::LdIndRef,
            "stind.ref" => Op::StIndRef,
            "ldobj" => Op::LdObj(self.type_operand(operands)?),
            "box" => Op::Box(self.type_operand(operands)?),
            "ldfld" | "ldsfld" => Op::LdFld(self.field(operands)?),
            "ldflda" | "ldsflda" => Op::LdFldA(self.field(operands)?),
            "stfld" | "stsfld" => Op::StFld(self.field(operands)?),
            "call" => Op::Call(self.method_operand(operands)?),
            "callvirt" => Op::CallVirt(self.method_operand(operands)?),
            "newobj" => Op::NewObj(self.method_operand(operands)?),
            "br" | "br.s" => branch(BranchKind::Always, operands)?,
            "brtrue" | "brtrue.s" | "brinst" | "brinst.s" => branch(BranchKind::True, operands)?,
            "brfalse" | "brfalse.s" | "brnull" | "brnull.s" | "brzero" | "brzero.s" => {
                branch(BranchKind::False, operands)?
            }
            "leave" | "leave.s" => branch(BranchKind::Leave, operands)?,
            "switch" => {
                let targets = operands
                    .parse_label_list()?
                    .iter()
                    .map(|label| self.label(label, line))
                    .collect::<Result<Vec<_>, _>>()?;
                Op::Switch(targets)
            }
            "ret" => Op::Ret,
            "throw" => Op::Throw,
            "endfinally" | "endfault" => Op::EndFinally,
            _ => match compact_operand(mnemonic) {
                Some(("ldarg", n)) => Op::LdArg(n),
                Some(("ldloc", n)) => Op::LdLoc(n),
                Some(("stloc", n)) => Op::StLoc(n),
                Some(("ldc.i4", n)) => Op::LdcI4(i32::from(n)),
                _ => {
                    return Err(ParseError::new(
                        line,
                        format!("unknown instruction '{}'", mnemonic),
                    ))
                }
            },
        })
    }

    /// Argument slot from a parameter name, `this`, or a slot number
    fn argument(&self, operands: &mut Cursor<'_>) -> Result<u16, ParseError> {
        let line = operands.line;
        match operands.next() {
            Some(Token::Int(slot)) => {
                u16::try_from(*slot).map_err(|_| ParseError::new(line, "argument out of range"))
            }
            Some(Token::Ident(name)) if name == "this" => {
                if self.method.has_this() {
                    Ok(0)
                } else {
                    Err(ParseError::new(line, "static methods have no 'this'"))
                }
            }
            Some(Token::Ident(name)) => self
                .method
                .parameters
                .iter()
                .position(|parameter| &parameter.name == name)
                .map(|idx| self.method.argument_index(idx))
                .ok_or_else(|| ParseError::new(line, format!("unknown parameter '{}'", name))),
            _ => Err(ParseError::new(line, "expected an argument")),
        }
    }

    /// Local slot from a local name or a slot number
    fn local(&self, operands: &mut Cursor<'_>) -> Result<u16, ParseError> {
        let line = operands.line;
        match operands.next() {
            Some(Token::Int(slot)) => {
                u16::try_from(*slot).map_err(|_| ParseError::new(line, "local out of range"))
            }
            Some(Token::Ident(name)) => self
                .local_names
                .get(name.as_str())
                .copied()
                .ok_or_else(|| ParseError::new(line, format!("unknown local '{}'", name))),
            _ => Err(ParseError::new(line, "expected a local")),
        }
    }

    fn type_operand(&self, operands: &mut Cursor<'_>) -> Result<TypeSig<'g>, ParseError> {
        let ty = operands.parse_type()?;
        self.loader
            .resolve(&ty, Some(self.method.declaring_type), operands.line)
    }

    /// Owner of a member reference (`Owner::member`)
    fn member_owner(&self, operands: &mut Cursor<'_>) -> Result<&'g TypeData<'g>, ParseError> {
        let owner = operands.parse_type()?;
        match operands.next() {
            Some(Token::DoubleColon) => (),
            _ => return Err(operands.error("expected '::'")),
        }
        self.loader
            .resolve_definition(&owner, Some(self.method.declaring_type), operands.line)
    }

    /// Field from `Owner::name`, or a bare name on the current type
    ///
    /// Fields are looked up along the base type chain.
    fn field(&self, operands: &mut Cursor<'_>) -> Result<&'g FieldData<'g>, ParseError> {
        let owner = if operands.peek_nth(1).is_some() {
            self.member_owner(operands)?
        } else {
            self.method.declaring_type
        };
        let name = operands.expect_ident()?;

        let mut next_type = Some(owner);
        while let Some(ty) = next_type {
            if let Some(field) = ty.find_field(name) {
                return Ok(field);
            }
            next_type = ty.base_type.get();
        }
        Err(operands.error(format!(
            "unknown field '{}::{}'",
            owner.full_name(),
            name
        )))
    }

    /// Method from `Owner::name(ParamType, ...)`
    ///
    /// Methods are looked up along the base type chain, by name and parameter count first. Only
    /// when that is ambiguous are parameter types compared.
    fn method_operand(&self, operands: &mut Cursor<'_>) -> Result<&'g MethodData<'g>, ParseError> {
        let line = operands.line;
        let owner = self.member_owner(operands)?;
        let name = operands.expect_ident()?;
        let parameter_types = operands.parse_type_list()?;

        let mut next_type = Some(owner);
        while let Some(ty) = next_type {
            let candidates: Vec<&'g MethodData<'g>> = ty
                .methods_named(name)
                .filter(|method| method.parameters.len() == parameter_types.len())
                .collect();
            match candidates.len() {
                0 => (),
                1 => return Ok(candidates[0]),
                _ => {
                    let scope = Some(self.method.declaring_type);
                    let mut names = vec![];
                    for parameter_type in &parameter_types {
                        names.push(self.loader.resolve(parameter_type, scope, line)?.full_name());
                    }
                    let mut matching = candidates.into_iter().filter(|method| {
                        method
                            .parameters
                            .iter()
                            .zip(&names)
                            .all(|(parameter, name)| &parameter.ty.full_name() == name)
                    });
                    return match (matching.next(), matching.next()) {
                        (Some(method), None) => Ok(method),
                        _ => Err(ParseError::new(
                            line,
                            format!("ambiguous method '{}::{}'", ty.full_name(), name),
                        )),
                    };
                }
            }
            next_type = ty.base_type.get();
        }

        Err(ParseError::new(
            line,
            format!("unknown method '{}::{}'", owner.full_name(), name),
        ))
    }
}

/// Split compact mnemonics such as `ldarg.2` or `ldc.i4.7` into their base and operand
fn compact_operand(mnemonic: &str) -> Option<(&str, u16)> {
    let dot = mnemonic.rfind('.')?;
    let (base, digit) = (&mnemonic[..dot], &mnemonic[dot + 1..]);
    let value: u16 = digit.parse().ok()?;
    let max = match base {
        "ldarg" | "ldloc" | "stloc" => 3,
        "ldc.i4" => 8,
        _ => return None,
    };
    if value <= max {
        Some((base, value))
    } else {
        None
    }
}
