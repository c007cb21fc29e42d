use crate::il::code::{Instruction, Op};
use crate::il::type_graph::SystemLibrary;
use crate::il::FullName;

/// Does the body already throw an `ArgumentNullException` naming this parameter?
///
/// Only two literal shapes are recognised, anywhere in the body:
///
/// ```text,ignore,no_run
/// ldstr "name"
/// newobj System.ArgumentNullException::.ctor(string)
/// throw
///
/// ldstr "name"
/// ldstr "message"
/// newobj System.ArgumentNullException::.ctor(string, string)
/// throw
/// ```
pub fn has_existing_guard(
    instructions: &[Instruction<'_>],
    parameter_name: &str,
    system: &SystemLibrary<'_>,
) -> bool {
    let param_ctor = system.members.argument_null_exception_init_param.full_name();
    let param_message_ctor = system
        .members
        .argument_null_exception_init_param_message
        .full_name();
    let loads_name = |idx: usize| {
        matches!(&instructions[idx].op, Op::LdStr(string) if string == parameter_name)
    };

    for i in 1..instructions.len().saturating_sub(1) {
        let constructor = match &instructions[i].op {
            Op::NewObj(constructor) => constructor.full_name(),
            _ => continue,
        };
        if instructions[i + 1].op != Op::Throw {
            continue;
        }
        if constructor == param_ctor && loads_name(i - 1) {
            return true;
        }
        if constructor == param_message_ctor && i > 1 && loads_name(i - 2) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::code::MethodBody;
    use crate::il::type_graph::{TypeGraph, TypeGraphArenas};

    #[test]
    fn recognises_both_constructor_shapes() {
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let members = &system.members;

        let mut body = MethodBody::new();
        body.push(Op::LdStr(String::from("first")));
        body.push(Op::NewObj(members.argument_null_exception_init_param));
        body.push(Op::Throw);
        body.push(Op::LdStr(String::from("second")));
        body.push(Op::LdStr(String::from("second is missing")));
        body.push(Op::NewObj(members.argument_null_exception_init_param_message));
        body.push(Op::Throw);
        body.push(Op::LdStr(String::from("third")));
        body.push(Op::NewObj(members.invalid_operation_exception_init_message));
        body.push(Op::Throw);
        body.push(Op::LdStr(String::from("fourth")));
        body.push(Op::NewObj(members.argument_null_exception_init_param));
        body.push(Op::Pop);
        body.push(Op::Ret);

        let instructions = &body.instructions;
        assert!(has_existing_guard(instructions, "first", &system));
        assert!(has_existing_guard(instructions, "second", &system));
        assert!(!has_existing_guard(instructions, "second is missing", &system));
        assert!(!has_existing_guard(instructions, "third", &system));
        assert!(!has_existing_guard(instructions, "fourth", &system));
        assert!(!has_existing_guard(&[], "first", &system));
    }
}
