pub mod import;
pub mod info;
pub mod test;
pub mod train;
