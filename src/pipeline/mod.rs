//! Pipeline stages for turning product photos into listing copy.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ normalize ──▶ encode ──▶ request ──▶ llm ──▶ parse
//! (filter)   (resize)      (base64)   (prompt)    (model)  (JSON / lines)
//! ```
//!
//! 1. [`intake`]: keep `image/*` files, drop oversized uploads, read
//!    indexed form parts
//! 2. [`normalize`]: downscale and recompress images above the size
//!    threshold; runs in `spawn_blocking` because decoding is CPU-bound
//! 3. [`encode`]: base64-wrap each buffer as an inline request part
//! 4. [`request`]: assemble the fixed prompt and images into the request
//!    body, preserving image order
//! 5. [`llm`]: the single model call; the only stage with network I/O
//! 6. [`parse`]: two-tier interpretation of the model's free-form answer

pub mod encode;
pub mod intake;
pub mod llm;
pub mod normalize;
pub mod parse;
pub mod request;
