use crate::domain::account::Account;
use std::io::{self, Write};

/// Writes account balances as CSV (`account_id,balance`).
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header followed by one row per account, then flushes.
    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = Account>) -> io::Result<()> {
        self.writer
            .write_record(["account_id", "balance"])
            .map_err(io::Error::from)?;
        for account in accounts {
            self.writer
                .write_record([account.id.to_string(), account.balance.to_string()])
                .map_err(io::Error::from)?;
        }
        self.writer.flush()
    }
}
