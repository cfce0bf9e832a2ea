//! Splits long page text into bounded, slightly overlapping chunks so each
//! fits a single generation request.

/// Split `text` into chunks of at most `chunk_size` characters, each carrying
/// the last `overlap` characters of its predecessor. Text that already fits
/// comes back as a single chunk equal to the input. A zero `chunk_size` (a
/// misconfigured file) is clamped to 1 rather than rejected.
pub fn text_chunker(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}
