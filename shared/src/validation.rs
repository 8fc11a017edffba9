//! Validation helpers for the inventory document engine
//!
//! All validators return `Result<(), &'static str>`; callers wrap the message
//! into their own error type.

use rust_decimal::Decimal;

// ============================================================================
// Quantity & Money Validations
// ============================================================================

/// Validate a document line quantity (strictly positive)
pub fn validate_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a unit price or cost (zero allowed for free-of-charge lines)
pub fn validate_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Price cannot be negative");
    }
    Ok(())
}

/// Validate a GST rate percentage
pub fn validate_gst_rate(rate: Decimal) -> Result<(), &'static str> {
    if rate < Decimal::ZERO || rate > Decimal::from(100) {
        return Err("GST rate must be between 0 and 100");
    }
    Ok(())
}

/// Validate that a document carries at least one item line
pub fn validate_items_not_empty(item_count: usize) -> Result<(), &'static str> {
    if item_count == 0 {
        return Err("Document must have at least one item");
    }
    Ok(())
}

// ============================================================================
// Identity Validations
// ============================================================================

/// Validate a product SKU (1-64 chars, alphanumeric with dash/underscore/dot)
pub fn validate_sku(sku: &str) -> Result<(), &'static str> {
    if sku.is_empty() {
        return Err("SKU cannot be empty");
    }
    if sku.len() > 64 {
        return Err("SKU must be at most 64 characters");
    }
    if !sku
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err("SKU may only contain letters, digits, dash, underscore and dot");
    }
    Ok(())
}

/// Validate a display name (non-blank, at most 255 chars)
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Name cannot be blank");
    }
    if name.len() > 255 {
        return Err("Name must be at most 255 characters");
    }
    Ok(())
}

// ============================================================================
// Numbering Validations
// ============================================================================

/// Validate a configured document-number padding width
pub fn validate_series_padding(padding: i64) -> Result<(), &'static str> {
    if !(1..=10).contains(&padding) {
        return Err("Series padding must be between 1 and 10");
    }
    Ok(())
}

/// Validate a configured document-number prefix
pub fn validate_series_prefix(prefix: &str) -> Result<(), &'static str> {
    if prefix.len() > 16 {
        return Err("Series prefix must be at most 16 characters");
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err("Series prefix cannot contain whitespace");
    }
    Ok(())
}
