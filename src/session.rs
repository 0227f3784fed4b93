use std::path::Path;

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::ExecutionProvider;

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[instrument(level = "debug")]
pub(crate) fn build_session(
    path: &Path,
    num_threads: usize,
    execution_providers: &[ExecutionProvider],
) -> ort::Result<Session> {
    // DirectML does not support parallel execution or memory patterns
    #[cfg(feature = "directml")]
    let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let execution_providers = execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
            }
        },
    );

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(num_threads)?
        .with_intra_threads(num_threads)?
        .with_execution_providers(execution_providers)?
        .commit_from_file(path)?;

    log::debug!("Session inputs: {:?}", session.inputs);
    log::debug!("Session outputs: {:?}", session.outputs);

    Ok(session)
}
