pub mod csv_ledger;
