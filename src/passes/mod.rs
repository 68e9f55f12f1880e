//! The HIR optimization pipeline.
//!
//! Passes run in a fixed order on each function: context promotion,
//! simplification, constant propagation, simplification again, dead-code
//! elimination, finalization. Each pass is idempotent on its own output
//! and the pipeline reaches a fixpoint in a single run.

mod constant_propagation;
mod context_promotion;
mod dead_code_elimination;
mod finalization;
mod simplification;

pub use constant_propagation::ConstantPropagationPass;
pub use context_promotion::ContextPromotionPass;
pub use dead_code_elimination::DeadCodeEliminationPass;
pub use finalization::FinalizationPass;
pub use simplification::SimplificationPass;

use crate::config::Config;
use crate::error::Error;
use crate::hir::HirFunction;
use log::trace;

/// One rewrite over a function. Implementations must leave the def-use
/// structure valid.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&mut self, func: &mut HirFunction) -> Result<(), Error>;
}

/// The fixed pass order applied to every translated function.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            passes: vec![
                Box::new(ContextPromotionPass::new(config.store_all_context_values)),
                Box::new(SimplificationPass::new()),
                Box::new(ConstantPropagationPass::new()),
                Box::new(SimplificationPass::new()),
                Box::new(DeadCodeEliminationPass::new()),
                Box::new(FinalizationPass::new()),
            ],
        }
    }

    pub fn run(&mut self, func: &mut HirFunction) -> Result<(), Error> {
        for pass in &mut self.passes {
            trace!("running pass {}", pass.name());
            pass.run(func)?;
            #[cfg(debug_assertions)]
            func.validate().map_err(Error::Ir)?;
        }
        Ok(())
    }
}
