//! studyloop-core - adaptive teaching-mode selection
//!
//! This crate picks which teaching mode (quiz, flashcard, interactive) to
//! present next using Thompson sampling over per-mode Beta posteriors,
//! persists the learned state per user, and routes study commands to the
//! extraction and generation collaborators.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use studyloop_core::{CommandRouter, ManagerCommand, MemoryPolicyStore};
//!
//! async fn example() {
//!     let router = CommandRouter::new(Arc::new(MemoryPolicyStore::new()));
//!
//!     let envelope = router.dispatch(ManagerCommand::new("recommend").user("alice")).await;
//!     println!("{}", envelope.to_json());
//!
//!     let envelope = router
//!         .dispatch(
//!             ManagerCommand::new("update_rl")
//!                 .user("alice")
//!                 .param("mode", "quiz")
//!                 .param("feedback", 1.0),
//!         )
//!         .await;
//!     assert!(envelope.success);
//! }
//! ```
//!
//! # Architecture
//!
//! - [`policy`]: pure bandit transforms over [`PolicyState`]
//! - [`store`]: per-user persistence with self-healing loads
//! - [`session`]: transient extracted content keyed by session id
//! - [`collaborators`]: extraction and generation contracts
//! - [`router`]: command validation, dispatch and the result envelope

pub mod collaborators;
pub mod config;
pub mod error;
pub mod policy;
pub mod router;
pub mod session;
pub mod store;

pub use collaborators::{
    ExtractionRequest, ExtractionResponse, Extractor, GenerationRequest, GenerationResponse,
    Generator, HttpGenerator, TextExtractor, UnavailableGenerator,
};
pub use config::{
    CollaboratorConfig, SessionConfig, StorageBackend, StorageConfig, StudyConfig, DEFAULT_USER,
};
pub use error::{ErrorKind, PolicyError, Result, StoreError, StudyError};
pub use policy::{
    BanditConfig, BanditPolicy, BetaSampler, Feedback, ModeId, PolicyState, Prior,
    Recommendation, RecommendationSource,
};
pub use router::{Action, CommandRouter, Envelope, ManagerCommand, Payload};
pub use session::{SessionContext, SessionData};
pub use store::{
    JsonFilePolicyStore, MemoryPolicyStore, PolicyStore, SqlitePolicyStore, open_store,
};
