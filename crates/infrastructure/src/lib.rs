pub mod hostdb;
