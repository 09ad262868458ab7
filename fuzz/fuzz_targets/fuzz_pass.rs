#![no_main]

use libfuzzer_sys::fuzz_target;
use padelim_opt::{PassManager, PaddingEliminationConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data)
        && let Ok(mut graph) = padelim_ir::Graph::from_json(source)
    {
        // Loading and rewriting should never panic on any input.
        let config = PaddingEliminationConfig::default().with_sparse_input("input_ids");
        let _ = PassManager::padding_elimination(config).run(&mut graph);
    }
});
