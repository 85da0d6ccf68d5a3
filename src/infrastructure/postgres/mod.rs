pub mod trade_repo;
