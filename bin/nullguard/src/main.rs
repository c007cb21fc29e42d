use nullguard::il::code::TokenPool;
use nullguard::il::type_graph::{TypeGraph, TypeGraphArenas};
use nullguard::il::FullName;
use nullguard::*;

use clap::{Arg, ArgAction, Command};
use std::fs;

fn main() -> Result<(), weave::Error> {
    env_logger::init();

    let matches = Command::new("Null guard weaver")
        .version(clap::crate_version!())
        .about("Inject null checks into the methods of a textual module")
        .arg(
            Arg::new("flags")
                .long("flags")
                .value_name("FLAGS")
                .help("Validation flags for types without a `NullGuard` attribute (eg. `Arguments,ReturnValues`)"),
        )
        .arg(
            Arg::new("explicit")
                .long("explicit")
                .action(ArgAction::SetTrue)
                .help("Only guard slots marked `NotNull`"),
        )
        .arg(
            Arg::new("debug-build")
                .long("debug-build")
                .action(ArgAction::SetTrue)
                .help("Also emit `Debug.Assert` calls ahead of every guard"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("FILE")
                .help("Write the rewritten module here instead of to standard output"),
        )
        .arg(
            Arg::new("encode")
                .long("encode")
                .action(ArgAction::SetTrue)
                .help("Encode every rewritten body and log its size"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the input module file to use")
                .required(true)
                .index(1),
        )
        .get_matches();

    let mut settings = weave::Settings::new();
    if let Some(flags) = matches.get_one::<String>("flags") {
        settings.validation_flags = weave::ValidationFlags::parse(flags)?;
    }
    settings.explicit_mode = matches.get_flag("explicit");
    settings.debug_build = matches.get_flag("debug-build");

    let type_graph_arenas = TypeGraphArenas::new();
    let type_graph = TypeGraph::new(&type_graph_arenas);
    let system = type_graph.insert_system_types();

    let input = matches
        .get_one::<String>("INPUT")
        .expect("INPUT is required");
    log::info!("Reading and weaving '{}'", input);
    let source = fs::read_to_string(input).map_err(il::Error::IoError)?;
    let module = il::text::load_module(&type_graph, &system, &source)?;

    let mut weaver = weave::ModuleWeaver::new(&settings, &system);
    weaver.process_module(&module)?;

    if matches.get_flag("encode") {
        let mut tokens = TokenPool::new();
        for method in module.methods() {
            if let Some(body) = method.body.borrow().as_ref() {
                let encoded = body.encode(!method.return_type.is_void(), &mut tokens)?;
                log::info!(
                    "Encoded {} in {} bytes (max stack {})",
                    method.full_name(),
                    encoded.code.len(),
                    encoded.max_stack
                );
            }
        }
    }

    let output = il::text::print_module(&module);
    match matches.get_one::<String>("output") {
        Some(output_file) => {
            log::info!("Writing '{}'", output_file);
            fs::write(output_file, output).map_err(il::Error::IoError)?;
        }
        None => print!("{}", output),
    }

    Ok(())
}
