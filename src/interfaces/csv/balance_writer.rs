use crate::domain::balance::MerchantBalance;
use crate::domain::money::MONEY_SCALE;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    merchant: &'a str,
    currency: &'a str,
    available: String,
    pending: String,
}

/// Writes merchant balances as `merchant,currency,available,pending`.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Amounts are printed with exactly two decimals.
    pub fn write_balances<'b>(
        &mut self,
        balances: impl IntoIterator<Item = &'b MerchantBalance>,
    ) -> Result<()> {
        let mut wrote_any = false;
        for balance in balances {
            self.writer.serialize(BalanceRow {
                merchant: &balance.merchant_id,
                currency: balance.currency.as_str(),
                available: format!("{:.*}", MONEY_SCALE as usize, balance.available.0),
                pending: format!("{:.*}", MONEY_SCALE as usize, balance.pending.0),
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["merchant", "currency", "available", "pending"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
