mod common;

use common::*;
use nullguard::il::code::Op;
use nullguard::il::text::load_module;
use nullguard::il::type_graph::{MethodData, TypeGraph, TypeGraphArenas};
use nullguard::weave::{Error, ModuleWeaver, Settings};

const FETCHER: &str = r#"
    .document "Fetcher.cs"
    .class public Samples.Fetcher
      [CompilerGenerated]
      .class nested-private FetchStateMachine implements System.Runtime.CompilerServices.IAsyncStateMachine
        .field public string key
        .field public System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1<string> builder

        .method public void .ctor()
          ldarg this
          call System.Object::.ctor()
          ret
        .end

        .method public virtual void MoveNext()
          .locals (string result, System.Exception error)
          .try start to catcher catch System.Exception handler catcher to finish
          .line 12 13 12 30
        start:
          ldarg this
          ldfld key
          stloc result
          leave.s finish
        catcher:
          stloc error
          ldarg this
          ldflda builder
          ldloc error
          call System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1::SetException(System.Exception)
          leave.s done
        finish:
          .line 13 9 13 10
          ldarg this
          ldflda builder
          ldloc result
          call System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1::SetResult(!TResult)
        done:
          ret
        .end
      .end

      [CompilerGenerated]
      .class nested-private CountStateMachine implements System.Runtime.CompilerServices.IAsyncStateMachine
        .field public System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1<string> builder

        .method public void .ctor()
          ldarg this
          call System.Object::.ctor()
          ret
        .end

        .method public virtual void MoveNext()
          ldarg this
          ldflda builder
          ldnull
          call System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1::SetResult(!TResult)
          ret
        .end
      .end

      [CompilerGenerated]
      .class nested-private SumStateMachine implements System.Runtime.CompilerServices.IAsyncStateMachine
        .field public System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1<int> builder

        .method public void .ctor()
          ldarg this
          call System.Object::.ctor()
          ret
        .end

        .method public virtual void MoveNext()
          .locals (System.Exception error)
          .try start to catcher catch System.Exception handler catcher to done
        start:
          ldarg this
          ldflda builder
          ldc.i4 3
          call System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1::SetResult(!TResult)
          leave.s done
        catcher:
          stloc error
          ldarg this
          ldflda builder
          ldloc error
          call System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1::SetException(System.Exception)
          leave.s done
        done:
          ret
        .end
      .end

      [AsyncStateMachine]
      .method public System.Threading.Tasks.Task`1<int> Sum()
        .locals (SumStateMachine machine)
        newobj SumStateMachine::.ctor()
        stloc machine
        ldloc machine
        callvirt SumStateMachine::MoveNext()
        ldnull
        ret
      .end

      [AsyncStateMachine]
      .method public System.Threading.Tasks.Task`1<string> Fetch([AllowNull] string key)
        .locals (FetchStateMachine machine)
        newobj FetchStateMachine::.ctor()
        stloc machine
        ldloc machine
        ldarg key
        stfld FetchStateMachine::key
        ldloc machine
        callvirt FetchStateMachine::MoveNext()
        ldnull
        ret
      .end

      [AsyncStateMachine]
      .method public System.Threading.Tasks.Task`1<string> Count(string label)
        .locals (CountStateMachine machine)
        newobj CountStateMachine::.ctor()
        stloc machine
        ldloc machine
        callvirt CountStateMachine::MoveNext()
        ldnull
        ret
      .end
    .end
"#;

const FETCH: &str =
    "System.Threading.Tasks.Task`1<System.String> Samples.Fetcher::Fetch(System.String)";

#[test]
fn null_result_faults_the_task() {
    let arenas = TypeGraphArenas::new();
    let graph = TypeGraph::new(&arenas);
    let system = graph.insert_system_types();
    let (module, _) = weave_source(&graph, &system, FETCHER, &Settings::new());
    let fetch = method(&module, "Samples.Fetcher", "Fetch");
    let mut interpreter = Interpreter::new();
    let fetcher = interpreter.instantiate(module.find_type("Samples.Fetcher").unwrap());

    interpreter
        .invoke(fetch, vec![fetcher.clone(), Value::str("k")])
        .returned();
    interpreter
        .invoke(fetch, vec![fetcher, Value::Null])
        .returned();

    assert_eq!(
        interpreter.completions,
        vec![
            Completion::Result(Value::str("k")),
            Completion::Exception(Thrown {
                type_name: String::from("System.InvalidOperationException"),
                message: Some(format!(
                    "[NullGuard] Return value of method '{}' is null.",
                    FETCH
                )),
                param_name: None,
            }),
        ]
    );
}

#[test]
fn guards_go_into_the_state_machine() {
    let arenas = TypeGraphArenas::new();
    let graph = TypeGraph::new(&arenas);
    let system = graph.insert_system_types();
    let (module, report) = weave_source(&graph, &system, FETCHER, &Settings::new());
    let fetch = method(&module, "Samples.Fetcher", "Fetch");
    let move_next = module
        .find_method("Samples.Fetcher/FetchStateMachine", "MoveNext")
        .unwrap();
    let invalid_operation = system.classes.invalid_operation_exception;

    // The outer method only hands out the task
    assert_eq!(count_constructed(fetch, invalid_operation), 0);
    assert_eq!(count_constructed(move_next, invalid_operation), 1);

    // A failed check reports the exception and returns
    let set_exception = system.members.generic_async_task_method_builder_set_exception;
    assert_eq!(
        count_ops(move_next, |op| *op == Op::Call(set_exception)),
        2
    );
    assert_eq!(verify(move_next), 3);

    let body = move_next.body.borrow();
    let body = body.as_ref().unwrap();
    let handler = &body.exception_handlers[0];
    assert_eq!(body.position(handler.try_start).unwrap(), 0);
    let sequence_points = &body.debug_info.sequence_points;
    assert!(sequence_points.iter().any(|point| point.is_hidden()));
    assert!(report.guards_injected >= 1);
}

#[test]
fn state_machine_without_await_is_left_alone() {
    let arenas = TypeGraphArenas::new();
    let graph = TypeGraph::new(&arenas);
    let system = graph.insert_system_types();
    let (module, report) = weave_source(&graph, &system, FETCHER, &Settings::new());
    let move_next = module
        .find_method("Samples.Fetcher/CountStateMachine", "MoveNext")
        .unwrap();

    assert_eq!(
        report.warnings,
        vec![
            "Cannot add guards to 'System.Threading.Tasks.Task`1<System.String> \
             Samples.Fetcher::Count(System.String)' as the method contains no await keyword."
                .to_owned()
        ]
    );
    assert_eq!(
        count_constructed(move_next, system.classes.invalid_operation_exception),
        0
    );

    // Arguments of the outer method are still checked
    let count = method(&module, "Samples.Fetcher", "Count");
    assert_eq!(
        count_constructed(count, system.classes.argument_null_exception),
        1
    );
}

#[test]
fn value_type_results_are_not_guarded() {
    let arenas = TypeGraphArenas::new();
    let graph = TypeGraph::new(&arenas);
    let system = graph.insert_system_types();
    let module = load_module(&graph, &system, FETCHER).unwrap();
    let move_next = module
        .find_method("Samples.Fetcher/SumStateMachine", "MoveNext")
        .unwrap();
    fn ops(method: &MethodData<'_>) -> Vec<String> {
        let body = method.body.borrow();
        body.as_ref()
            .unwrap()
            .instructions
            .iter()
            .map(|insn| format!("{:?}", insn.op))
            .collect()
    }
    let original = ops(move_next);

    let settings = Settings::new();
    let mut weaver = ModuleWeaver::new(&settings, &system);
    weaver.process_module(&module).unwrap();

    assert_eq!(ops(move_next), original);
    assert_eq!(
        count_constructed(move_next, system.classes.invalid_operation_exception),
        0
    );
}

#[test]
fn failures_name_the_method() {
    let arenas = TypeGraphArenas::new();
    let graph = TypeGraph::new(&arenas);
    let system = graph.insert_system_types();
    let module = load_module(&graph, &system, FETCHER).unwrap();
    let fetch = method(&module, "Samples.Fetcher", "Fetch");
    let move_next = module
        .find_method("Samples.Fetcher/FetchStateMachine", "MoveNext")
        .unwrap();
    *move_next.body.borrow_mut() = None;
    let original = fetch.body.borrow().as_ref().unwrap().instructions.len();

    let settings = Settings::new();
    let mut weaver = ModuleWeaver::new(&settings, &system);
    let err = weaver.process_method(fetch).unwrap_err();
    match &err {
        Error::ProcessingMethod { method, .. } => assert_eq!(method, FETCH),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        format!("An error occurred processing method '{}'.", FETCH)
    );

    // Nothing was committed
    assert_eq!(
        fetch.body.borrow().as_ref().unwrap().instructions.len(),
        original
    );
}
