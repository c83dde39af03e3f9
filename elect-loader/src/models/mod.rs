//! Data models for elect-loader

pub mod domain;
pub mod import_session;
pub mod parameters;

pub use domain::{
    Candidate, Commission, Poll, PollDefinition, Protocol, ProtocolImage, ProtocolRecord,
    ProtocolResult, Region, ResultProvider, StoredImage, CANDIDATE_VALUES, RECORD_VALUES,
    SUMMARY_VALUES,
};
pub use import_session::{ImportCounters, ImportSession, ImportState, StateTransition};
pub use parameters::{ImportParameters, UnknownEntityAction, UpdatePolicy};
