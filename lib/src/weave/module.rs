use super::{Error, MethodProcessor, Settings};
use crate::il::type_graph::{MethodData, SystemLibrary};
use crate::il::{FullName, Module};

/// Summary of one weaving run
#[derive(Default, Debug)]
pub struct WeaveReport {
    /// Methods whose bodies were rewritten (even if no guard ended up being needed)
    pub methods_processed: usize,

    pub guards_injected: usize,

    /// Non-fatal problems, in the order they were found
    pub warnings: Vec<String>,
}

/// Weaves every method of a module, in declaration order
pub struct ModuleWeaver<'a, 'g> {
    settings: &'a Settings,
    system: &'a SystemLibrary<'g>,
    report: WeaveReport,
}

impl<'a, 'g> ModuleWeaver<'a, 'g> {
    pub fn new(settings: &'a Settings, system: &'a SystemLibrary<'g>) -> ModuleWeaver<'a, 'g> {
        ModuleWeaver {
            settings,
            system,
            report: WeaveReport::default(),
        }
    }

    /// Process every method of the module
    ///
    /// The first failure stops the run. Methods processed before it keep their guards.
    pub fn process_module(&mut self, module: &Module<'g>) -> Result<(), Error> {
        for ty in &module.types {
            log::info!("Processing type {:?}", ty);
            for method in ty.methods.iter() {
                self.process_method(method)?;
            }
        }
        log::info!(
            "Injected {} guards into {} methods",
            self.report.guards_injected,
            self.report.methods_processed
        );
        Ok(())
    }

    /// Process one method, unless it is generated code
    pub fn process_method(&mut self, method: &'g MethodData<'g>) -> Result<(), Error> {
        if self.settings.generated_code.is_generated_code(method) {
            log::trace!("Skipping generated {:?}", method);
            return Ok(());
        }

        MethodProcessor::new(self.settings, self.system, &mut self.report)
            .process(method)
            .map_err(|err| Error::ProcessingMethod {
                method: method.full_name(),
                source: Box::new(err),
            })
    }

    pub fn into_report(self) -> WeaveReport {
        self.report
    }
}
