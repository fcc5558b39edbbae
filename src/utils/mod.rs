//! Shared helpers.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, extract_json_candidates, find_closing, preview,
    try_extract_json_from_response, JsonExtractionResult, JsonStructureAnalysis,
};
