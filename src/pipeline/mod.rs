//! Pipeline stages for PDF-to-tutorial generation.
//!
//! Each submodule does one thing and is tested on its own; [`session`]
//! wires them into the per-document state machine.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ normalize ──▶ caption ──▶ accumulator ──▶ synthesize ──▶ assemble
//! (URL/path) (pdfium)   (URLs, ws)   (store+VLM)  (token FIFO)   (draft)        (Markdown)
//! ```
//!
//! 1. [`input`]       canonicalise the user-supplied path or URL to a local PDF
//! 2. [`extract`]     text layer and embedded images per page, on a blocking
//!    thread that stays one page ahead
//! 3. [`normalize`]   strip URLs and collapse whitespace
//! 4. [`caption`]     persist each image, then ask the model to describe it
//! 5. [`accumulator`] token-bounded window of recent pages
//! 6. [`synthesize`]  fold the window into the tutorial draft with retry
//! 7. [`assemble`]    render pages, images and the draft as one document

pub mod accumulator;
pub mod assemble;
pub mod caption;
pub mod encode;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod postprocess;
pub mod session;
pub mod source;
pub mod synthesize;

pub use session::TutorialPipeline;
