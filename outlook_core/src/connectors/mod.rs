pub mod outlook;
