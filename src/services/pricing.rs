//! Cost calculation for billable events.
//!
//! All arithmetic stays at full decimal precision; rounding to the 4-decimal
//! storage scale happens once, in the ledger, so repeated math never
//! compounds rounding error.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::EventType;
use crate::services::catalog::ModelDescriptor;

/// Flat per-byte rate for file uploads.
pub const BYTE_RATE: Decimal = dec!(0.00000001);

/// Flat per-token rate used when the provider did not report an
/// input/output split. An estimate, not an exact billing figure.
pub const FLAT_TOKEN_RATE: Decimal = dec!(0.0001);

/// Tokens billed for an `ai_response`, either precise (provider-reported
/// split) or a flat estimated total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBreakdown {
    Split { input: u64, output: u64 },
    Flat { total: u64 },
    None,
}

impl TokenBreakdown {
    pub fn total(&self) -> u64 {
        match self {
            TokenBreakdown::Split { input, output } => input + output,
            TokenBreakdown::Flat { total } => *total,
            TokenBreakdown::None => 0,
        }
    }
}

pub fn cost_of(
    event_type: EventType,
    tokens: &TokenBreakdown,
    bytes: u64,
    model: Option<&ModelDescriptor>,
) -> Decimal {
    match event_type {
        // Sending a message is metered by count, not priced.
        EventType::MessageSent => Decimal::ZERO,
        EventType::FileUpload => Decimal::from(bytes) * BYTE_RATE,
        EventType::AiResponse => match (tokens, model) {
            (TokenBreakdown::Split { input, output }, Some(model)) => {
                Decimal::from(*input) / dec!(1000) * model.input_cost_per_1k
                    + Decimal::from(*output) / dec!(1000) * model.output_cost_per_1k
            }
            _ => Decimal::from(tokens.total()) * FLAT_TOKEN_RATE,
        },
    }
}
