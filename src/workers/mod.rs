pub mod ledger_retention;
