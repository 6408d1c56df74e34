use std::path::Path;

/// Error type for path segment validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentValidationError {
    Empty,
    ContainsNullByte,
    ContainsPathSeparator,
    IsSpecialDirectory,
    InvalidSegment,
}

impl SegmentValidationError {
    pub fn message(&self) -> &'static str {
        match self {
            SegmentValidationError::Empty => "Segment cannot be empty",
            SegmentValidationError::ContainsNullByte => "Segment cannot contain null bytes",
            SegmentValidationError::ContainsPathSeparator => {
                "Segment cannot contain path separators (/ or \\)"
            }
            SegmentValidationError::IsSpecialDirectory => "Segment cannot be '.' or '..'",
            SegmentValidationError::InvalidSegment => {
                "Invalid segment: must be a single path component"
            }
        }
    }
}

impl std::fmt::Display for SegmentValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for SegmentValidationError {}

/// Validate a knowledge base id, document id or asset name before it is
/// joined into a local path or an object key.
/// Checks if:
/// - Segment is not empty
/// - Segment contains no path separators (/, \) or null bytes
/// - Segment is not "." or ".."
/// - Path::new(segment).file_name() round-trips to the same string
pub fn validate_segment(segment: &str) -> Result<(), SegmentValidationError> {
    if segment.is_empty() {
        return Err(SegmentValidationError::Empty);
    }

    if segment.contains('\0') {
        return Err(SegmentValidationError::ContainsNullByte);
    }

    if segment.contains('/') || segment.contains('\\') {
        return Err(SegmentValidationError::ContainsPathSeparator);
    }

    if segment == "." || segment == ".." {
        return Err(SegmentValidationError::IsSpecialDirectory);
    }

    let path = Path::new(segment);
    if path.file_name().and_then(|n| n.to_str()) != Some(segment) {
        return Err(SegmentValidationError::InvalidSegment);
    }

    Ok(())
}
