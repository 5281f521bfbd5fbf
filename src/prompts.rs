//! Instruction text sent with every copy-generation request.
//!
//! The prompt is fixed at build time. The response parser in
//! [`crate::pipeline::parse`] reads exactly the JSON keys it asks for.

/// Instruction block placed before the product images.
///
/// The images follow in selection order, so "these images" reads front view
/// first when the user photographed it that way.
pub const LISTING_COPY_PROMPT: &str = r#"Analyze these product images and generate compelling sales copy for a second-hand marketplace listing.

Please provide:
1. A catchy, descriptive title (60 characters max)
2. A detailed description highlighting key features, condition, and benefits
3. A suggested price based on the item type and condition
4. The item category, brand and model when they can be identified

Format your response as JSON with keys: title, description, price (optional number), category (optional string), brand (optional string), model (optional string)

Focus on:
- Highlighting the item's best features
- Describing condition accurately
- Using keywords buyers would search for
- Creating urgency and appeal
- Being honest about any flaws visible

Respond with the JSON object only."#;
