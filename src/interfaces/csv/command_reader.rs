use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    Create,
    Confirm,
    Refund,
    Cancel,
    Status,
}

/// One row of a command file.
///
/// `merchant` and `key` identify the payment: `create` uses `key` as its
/// idempotency key, every later row finds the transaction through it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: CommandOp,
    pub merchant: String,
    pub key: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Reads payment commands from a CSV source.
///
/// Whitespace is trimmed and trailing optional columns may be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands; a malformed row yields an error and the
    /// iterator carries on with the next one.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, merchant, key, amount, currency, payer, reason, provider\n\
                    create, m1, order-1, 50.00, USD, , , mock\n\
                    confirm, m1, order-1, , , PAYER-1, ,\n\
                    refund, m1, order-1, 20.00, , , damaged";
        let commands: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();

        assert_eq!(commands.len(), 3);
        let create = commands[0].as_ref().unwrap();
        assert_eq!(create.op, CommandOp::Create);
        assert_eq!(create.amount, Some(dec!(50.00)));
        assert_eq!(create.currency.as_deref(), Some("USD"));
        assert_eq!(create.payer, None);
        assert_eq!(create.provider.as_deref(), Some("mock"));

        let confirm = commands[1].as_ref().unwrap();
        assert_eq!(confirm.payer.as_deref(), Some("PAYER-1"));
        assert_eq!(confirm.amount, None);

        let refund = commands[2].as_ref().unwrap();
        assert_eq!(refund.reason.as_deref(), Some("damaged"));
        assert_eq!(refund.provider, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, merchant, key, amount\nchargeback, m1, k1, 1.0\ncancel, m1, k1";
        let commands: Vec<Result<CommandRecord>> =
            CommandReader::new(data.as_bytes()).commands().collect();

        assert!(commands[0].is_err());
        assert_eq!(commands[1].as_ref().unwrap().op, CommandOp::Cancel);
    }
}
