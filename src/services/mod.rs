pub mod payments_tax;
