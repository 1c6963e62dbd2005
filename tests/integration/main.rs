//! Integration tests for the PADDOCK engine.

mod mock_source;
mod scenarios;
