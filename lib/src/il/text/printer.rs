//! Render a module back into the textual format

use super::lexer::quote;
use crate::il::code::{BranchForm, BranchKind, HandlerKind, InstrId, MethodBody, Op};
use crate::il::debug_info::SequencePoint;
use crate::il::type_graph::{MethodData, ParameterData, TypeData, TypeKind};
use crate::il::{CustomAttribute, FieldAccessFlags, FullName, Module, TypeSig};
use std::collections::HashMap;

/// Render every type of the module, nested types inside their declaring type
pub fn print_module(module: &Module<'_>) -> String {
    let mut printer = Printer {
        out: String::new(),
        document: None,
    };
    for ty in &module.types {
        if ty.declaring_type.is_none() {
            printer.print_type(ty, 0);
        }
    }
    printer.out
}

struct Printer {
    out: String,

    /// Document named by the last `.document` directive printed
    document: Option<String>,
}

impl Printer {
    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn print_attributes(&mut self, indent: usize, attributes: &[CustomAttribute]) {
        for attribute in attributes {
            let attribute = attribute_text(attribute);
            self.line(indent, &format!("[{}]", attribute));
        }
    }

    fn print_type(&mut self, ty: &TypeData<'_>, indent: usize) {
        self.print_attributes(indent, &ty.attributes);

        let mut header = String::from(match ty.kind {
            TypeKind::Class => ".class",
            TypeKind::Interface => ".interface",
            TypeKind::ValueType => ".struct",
        });
        for keyword in ty.access_flags.keywords() {
            header.push(' ');
            header.push_str(keyword);
        }
        header.push(' ');
        if ty.declaring_type.is_some() {
            header.push_str(&ty.name);
        } else {
            header.push_str(&ty.full_name());
        }
        if !ty.generic_parameters.is_empty() {
            header.push('<');
            header.push_str(&ty.generic_parameters.join(", "));
            header.push('>');
        }
        if let Some(base_type) = ty.base_type.get() {
            let default_base = match ty.kind {
                TypeKind::Class => "System.Object",
                TypeKind::ValueType => "System.ValueType",
                TypeKind::Interface => "",
            };
            if base_type.full_name() != default_base {
                header.push_str(" : ");
                header.push_str(&base_type.full_name());
            }
        }
        let interfaces: Vec<String> = ty.interfaces.iter().map(|i| i.full_name()).collect();
        if !interfaces.is_empty() {
            header.push_str(" implements ");
            header.push_str(&interfaces.join(", "));
        }
        self.line(indent, &header);

        for field in ty.fields.iter() {
            let mut text = String::from(".field");
            for (flag, keyword) in [
                (FieldAccessFlags::STATIC, "static"),
                (FieldAccessFlags::PUBLIC, "public"),
                (FieldAccessFlags::PRIVATE, "private"),
            ] {
                if field.access_flags.contains(flag) {
                    text.push(' ');
                    text.push_str(keyword);
                }
            }
            text.push_str(&format!(" {} {}", type_text(&field.ty), field.name));
            self.line(indent + 1, &text);
        }

        for method in ty.methods.iter() {
            self.print_method(method, indent + 1);
        }

        for nested in ty.nested_types.iter() {
            self.print_type(nested, indent + 1);
        }

        self.line(indent, ".end");
    }

    fn print_method(&mut self, method: &MethodData<'_>, indent: usize) {
        self.print_attributes(indent, &method.attributes);

        let mut header = String::from(".method");
        for keyword in method.access_flags.keywords() {
            header.push(' ');
            header.push_str(keyword);
        }
        for attribute in &method.return_attributes {
            header.push_str(&format!(" [return: {}]", attribute_text(attribute)));
        }
        let parameters: Vec<String> = method
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, parameter)| parameter_text(parameter, idx))
            .collect();
        header.push_str(&format!(
            " {} {}({})",
            type_text(&method.return_type),
            method.name,
            parameters.join(", ")
        ));
        self.line(indent, &header);

        if let Some(body) = method.body.borrow().as_ref() {
            self.print_body(method, body, indent + 1);
        }
        self.line(indent, ".end");
    }

    fn print_body(&mut self, method: &MethodData<'_>, body: &MethodBody<'_>, indent: usize) {
        let local_names: Vec<String> = body
            .variables
            .iter()
            .enumerate()
            .map(|(idx, variable)| slot_name(&variable.name, "V", idx))
            .collect();

        if !body.variables.is_empty() || body.init_locals {
            let locals: Vec<String> = body
                .variables
                .iter()
                .zip(&local_names)
                .map(|(variable, name)| format!("{} {}", type_text(&variable.ty), name))
                .collect();
            let init = if body.init_locals { " init" } else { "" };
            self.line(indent, &format!(".locals{} ({})", init, locals.join(", ")));
        }

        // Every branch target and region boundary gets a label named after its position
        let mut labels: HashMap<InstrId, String> = HashMap::new();
        let mut label = |id: InstrId| -> String {
            labels
                .entry(id)
                .or_insert_with(|| match body.index_of(id) {
                    Some(position) => format!("L{}", position),
                    None => format!("{:?}", id),
                })
                .clone()
        };

        let mut handlers = vec![];
        for handler in &body.exception_handlers {
            let kind = match &handler.kind {
                HandlerKind::Catch(ty) => format!("catch {}", ty.full_name()),
                HandlerKind::Finally => String::from("finally"),
            };
            let mut text = format!(
                ".try {} to {} {} handler {}",
                label(handler.try_start),
                label(handler.try_end),
                kind,
                label(handler.handler_start),
            );
            if let Some(handler_end) = handler.handler_end {
                text.push_str(&format!(" to {}", label(handler_end)));
            }
            handlers.push(text);
        }

        let mut lines = vec![];
        for instruction in &body.instructions {
            let text = op_text(method, &local_names, &instruction.op, &mut label);
            lines.push((instruction.id, text));
        }

        for handler in handlers {
            self.line(indent, &handler);
        }

        let mut sequence_points: HashMap<InstrId, Vec<&SequencePoint>> = HashMap::new();
        for sequence_point in &body.debug_info.sequence_points {
            sequence_points
                .entry(sequence_point.instruction)
                .or_default()
                .push(sequence_point);
        }

        for (id, text) in lines {
            for sequence_point in sequence_points.remove(&id).unwrap_or_default() {
                if self.document.as_deref() != Some(sequence_point.document.as_str()) {
                    self.document = Some(sequence_point.document.clone());
                    self.line(indent, &format!(".document {}", quote(&sequence_point.document)));
                }
                if sequence_point.is_hidden() {
                    self.line(indent, ".line hidden");
                } else {
                    self.line(
                        indent,
                        &format!(
                            ".line {} {} {} {}",
                            sequence_point.start_line,
                            sequence_point.start_column,
                            sequence_point.end_line,
                            sequence_point.end_column
                        ),
                    );
                }
            }
            match labels.get(&id) {
                Some(label) => self.line(indent - 1, &format!("{}: {}", label, text)),
                None => self.line(indent, &text),
            }
        }

    }
}

fn op_text(
    method: &MethodData<'_>,
    local_names: &[String],
    op: &Op<'_>,
    label: &mut dyn FnMut(InstrId) -> String,
) -> String {
    let argument = |slot: u16| -> String {
        if method.has_this() && slot == 0 {
            return String::from("this");
        }
        match method.parameter_of_argument(slot) {
            Some(parameter) if is_plain_identifier(&parameter.name) => parameter.name.clone(),
            _ => slot.to_string(),
        }
    };
    let local = |slot: u16| -> String {
        local_names
            .get(slot as usize)
            .cloned()
            .unwrap_or_else(|| slot.to_string())
    };

    match op {
        Op::Nop => String::from("nop"),
        Op::LdNull => String::from("ldnull"),
        Op::LdStr(string) => format!("ldstr {}", quote(string)),
        Op::LdcI4(value) => format!("ldc.i4 {}", value),
        Op::LdArg(slot) => format!("ldarg {}", argument(*slot)),
        Op::LdArgA(slot) => format!("ldarga {}", argument(*slot)),
        Op::StArg(slot) => format!("starg {}", argument(*slot)),
        Op::LdLoc(slot) => format!("ldloc {}", local(*slot)),
        Op::LdLocA(slot) => format!("ldloca {}", local(*slot)),
        Op::StLoc(slot) => format!("stloc {}", local(*slot)),
        Op::Dup => String::from("dup"),
        Op::Pop => String::from("pop"),
        Op::Ceq => String::from("ceq"),
        Op::Add => String::from("add"),
        Op::Sub => String::from("sub"),
        Op::LdIndRef => String::from("ldind.ref"),
        Op::StIndRef => String::from("stind.ref"),
        Op::LdObj(ty) => format!("ldobj {}", type_text(ty)),
        Op::Box(ty) => format!("box {}", type_text(ty)),
        Op::LdFld(field) => format!("ldfld {}::{}", field.declaring_type.full_name(), field.name),
        Op::LdFldA(field) => format!("ldflda {}::{}", field.declaring_type.full_name(), field.name),
        Op::StFld(field) => format!("stfld {}::{}", field.declaring_type.full_name(), field.name),
        Op::Call(method) => format!("call {}", method_reference(method)),
        Op::CallVirt(method) => format!("callvirt {}", method_reference(method)),
        Op::NewObj(method) => format!("newobj {}", method_reference(method)),
        Op::Ret => String::from("ret"),
        Op::Throw => String::from("throw"),
        Op::EndFinally => String::from("endfinally"),
        Op::Branch(kind, form, target) => {
            let mnemonic = match kind {
                BranchKind::Always => "br",
                BranchKind::True => "brtrue",
                BranchKind::False => "brfalse",
                BranchKind::Leave => "leave",
            };
            let suffix = if *form == BranchForm::Short { ".s" } else { "" };
            format!("{}{} {}", mnemonic, suffix, label(*target))
        }
        Op::Switch(targets) => {
            let targets: Vec<String> = targets.iter().map(|target| label(*target)).collect();
            format!("switch ({})", targets.join(", "))
        }
    }
}

fn method_reference(method: &MethodData<'_>) -> String {
    let parameters: Vec<String> = method
        .parameters
        .iter()
        .map(|parameter| type_text(&parameter.ty))
        .collect();
    format!(
        "{}::{}({})",
        method.declaring_type.full_name(),
        method.name,
        parameters.join(", ")
    )
}

fn parameter_text(parameter: &ParameterData<'_>, idx: usize) -> String {
    let mut text = String::new();
    for attribute in &parameter.attributes {
        text.push_str(&format!("[{}] ", attribute_text(attribute)));
    }
    if parameter.is_out {
        text.push_str("out ");
        text.push_str(&type_text(parameter.ty.element_type()));
    } else {
        text.push_str(&type_text(&parameter.ty));
    }
    text.push(' ');
    text.push_str(&slot_name(&parameter.name, "A", idx));
    if parameter.has_null_default {
        text.push_str(" = null");
    }
    text
}

/// Type as written in the textual format (system primitives use their keyword)
fn type_text(ty: &TypeSig<'_>) -> String {
    match ty {
        TypeSig::Void => String::from("void"),
        TypeSig::Named(ty) => {
            let full_name = ty.full_name();
            String::from(match full_name.as_str() {
                "System.Object" => "object",
                "System.String" => "string",
                "System.Boolean" => "bool",
                "System.Int32" => "int32",
                "System.Int64" => "int64",
                _ => return full_name,
            })
        }
        TypeSig::GenericParam { name, value_type } => {
            if *value_type {
                format!("!{}:struct", name)
            } else {
                format!("!{}", name)
            }
        }
        TypeSig::ByRef(element) => format!("{}&", type_text(element)),
        TypeSig::Array(element) => format!("{}[]", type_text(element)),
        TypeSig::GenericInstance(ty, arguments) => {
            let arguments: Vec<String> = arguments.iter().map(type_text).collect();
            format!("{}<{}>", ty.full_name(), arguments.join(", "))
        }
    }
}

fn attribute_text(attribute: &CustomAttribute) -> String {
    if attribute.arguments.is_empty() {
        return attribute.name.clone();
    }
    let arguments: Vec<String> = attribute
        .arguments
        .iter()
        .map(|argument| {
            let raw = argument.starts_with(|c: char| c.is_alphabetic() || c == '_')
                && argument
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '|'));
            if raw {
                argument.clone()
            } else {
                quote(argument)
            }
        })
        .collect();
    format!("{}({})", attribute.name, arguments.join(", "))
}

fn is_plain_identifier(name: &str) -> bool {
    name.starts_with(|c: char| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Name usable in the textual format, falling back to `{prefix}_{idx}`
fn slot_name(name: &str, prefix: &str, idx: usize) -> String {
    if is_plain_identifier(name) && name != "this" {
        name.to_owned()
    } else {
        format!("{}_{}", prefix, idx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::text::load_module;
    use crate::il::type_graph::{TypeGraph, TypeGraphArenas};

    const SAMPLE: &str = r#"
        .document "Sample.cs"
        [NullGuard(Arguments|ReturnValues)]
        .class public Samples.Store implements Samples.IStore
          .field private static string fallback
          .method public virtual [return: AllowNull] string Lookup([AllowNull] string key, out string found, object hint = null)
            .locals init (string result, int32 attempts)
            .try start to finish catch System.Exception handler recover to done
            .line 3 5 3 40
          start:
            ldarg found
            ldnull
            stind.ref
            ldarg key
            brfalse.s missing
            ldsfld fallback
            stloc result
            leave.s done
          missing:
            ldstr "missing \"key\""
            stloc result
          finish:
            leave.s done
          recover:
            pop
            leave.s done
          done:
            .line hidden
            ldloc result
            ret
          .end
        .end
        .interface public Samples.IStore
          .method public virtual abstract string Lookup(string key, out string found, object hint)
          .end
        .end
    "#;

    #[test]
    fn printed_modules_load_back_identically() {
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let module = load_module(&graph, &system, SAMPLE).unwrap();
        let printed = print_module(&module);

        assert!(printed.contains("[NullGuard(Arguments|ReturnValues)]"));
        assert!(printed.contains(
            ".method public virtual [return: AllowNull] string Lookup([AllowNull] string key, out string found, object hint = null)"
        ));
        assert!(printed.contains(".try L0 to L10 catch System.Exception handler L11 to L13"));
        assert!(printed.contains("L8: ldstr \"missing \\\"key\\\"\""));
        assert!(printed.contains("ldfld Samples.Store::fallback"));

        // Loading the printed module into a fresh graph prints the same text again
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let reloaded = load_module(&graph, &system, &printed).unwrap();
        assert_eq!(print_module(&reloaded), printed);
    }
}
