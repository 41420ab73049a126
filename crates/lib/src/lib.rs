//! ragreply core library: webhook normalization, context retrieval, reply generation and
//! dispatch, wired together behind the gateway. Used by the CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod reply;
pub mod retrieval;
