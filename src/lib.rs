//! # kb-stack
//!
//! Declarative deployment of an Amazon Bedrock knowledge base fed from an
//! S3 documents bucket.
//!
//! The stack — bucket, execution role, prefix-scoped read grant, knowledge
//! base, S3 data source — is declared as a typed resource graph, rendered
//! to a deterministic CloudFormation template, and driven through the
//! engine by the `kbstack` CLI. A small HTTP server answers questions
//! grounded in the ingested documents via Bedrock's RetrieveAndGenerate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ Config      │──▶│ Declaration   │──▶│ Template JSON │
//! │ (TOML)      │   │ (typed graph) │   │ (determinist.)│
//! └─────────────┘   └───────────────┘   └──────┬────────┘
//!                                              │
//!                         ┌────────────────────┤
//!                         ▼                    ▼
//!                   ┌───────────┐        ┌───────────┐
//!                   │  deploy   │        │   synth   │
//!                   │ (engine)  │        │ (stdout)  │
//!                   └───────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbstack synth                 # render the template
//! kbstack deploy                # create or update the stack
//! kbstack outputs --json       # read back bucket name and ids
//! kbstack serve chat            # answer questions over the knowledge base
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`stack`] | The resource declaration (typed graph) |
//! | [`template`] | CloudFormation template model and intrinsics |
//! | [`cloudformation`] | Deployment engine client and [`cloudformation::StackEngine`] seam |
//! | [`aws`] | SigV4 request signing |
//! | [`deploy`] | Create-or-update driver |
//! | [`destroy`] | Teardown driver |
//! | [`outputs`] | Deployed output readback |
//! | [`synth`] | Template rendering command |
//! | [`resources`] | Resource graph listing command |
//! | [`progress`] | Deployment progress reporting |
//! | [`bedrock`] | Bedrock agent runtime client |
//! | [`server`] | Chat HTTP server |

pub mod aws;
pub mod bedrock;
pub mod cloudformation;
pub mod config;
pub mod deploy;
pub mod destroy;
pub mod outputs;
pub mod progress;
pub mod resources;
pub mod server;
pub mod stack;
pub mod synth;
pub mod template;
