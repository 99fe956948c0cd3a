//! # Session Scribe
//!
//! A session capture and study backend: recordings go in, a searchable,
//! chat-ready study artifact comes out.
//!
//! Attaching an audio recording to a session kicks off a background
//! pipeline that transcribes it, produces a structured summary with
//! suggested reading, and indexes the transcript into embedded chunks for
//! retrieval. Chat answers are grounded strictly in the retrieved chunks
//! behind a confidence gate, with optional external background reading.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Audio  │──▶│  Pipeline                 │──▶│  SQLite   │
//! │ upload  │   │ transcribe→summarize      │   │ segments  │
//! └─────────┘   │ →chunk→embed              │   │ chunks    │
//!               └──────────────────────────┘   └────┬─────┘
//!                                                   │
//!                                              ┌────▼─────┐
//!                                              │   HTTP    │
//!                                              │ RAG chat  │
//!                                              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`audio`] | Audio upload storage |
//! | [`chunker`] | Transcript chunking |
//! | [`embedding`] | Embedding strategies (remote + hash fallback) |
//! | [`retrieval`] | Cosine ranking over chunk sets |
//! | [`chat`] | Confidence-gated grounded chat |
//! | [`openai`] | Remote engine adapter |
//! | [`offline`] | Deterministic offline fixtures |
//! | [`search`] | External background-reading search |
//! | [`pipeline`] | Session processing orchestration |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod audio;
pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod migrate;
pub mod models;
pub mod offline;
pub mod openai;
pub mod pipeline;
pub mod retrieval;
pub mod search;
pub mod server;
