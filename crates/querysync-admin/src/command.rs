//! Command-line commands for `querysync-admin`.

use std::fmt;

pub const USAGE: &str = "\
Usage: querysync-admin <command>

Commands:
  merchants [status]          List merchants, optionally filtered by status
  merchant <id>               Show one merchant
  rename <id> <name>          Rename a merchant
  delete <id>                 Delete a merchant
  orders <customer> [status]  List a customer's orders
  refund <customer> <order>   Refund an order";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Merchants { status: Option<String> },
    Merchant { id: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Orders { customer_id: String, status: Option<String> },
    Refund { customer_id: String, order_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\n{}", self.0, USAGE)
    }
}

impl std::error::Error for UsageError {}

impl Command {
    /// Parse arguments following the program name
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, UsageError> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        match args.as_slice() {
            ["merchants"] => Ok(Command::Merchants { status: None }),
            ["merchants", status] => Ok(Command::Merchants {
                status: Some(status.to_string()),
            }),
            ["merchant", id] => Ok(Command::Merchant { id: id.to_string() }),
            ["rename", id, name @ ..] if !name.is_empty() => Ok(Command::Rename {
                id: id.to_string(),
                name: name.join(" "),
            }),
            ["delete", id] => Ok(Command::Delete { id: id.to_string() }),
            ["orders", customer] => Ok(Command::Orders {
                customer_id: customer.to_string(),
                status: None,
            }),
            ["orders", customer, status] => Ok(Command::Orders {
                customer_id: customer.to_string(),
                status: Some(status.to_string()),
            }),
            ["refund", customer, order] => Ok(Command::Refund {
                customer_id: customer.to_string(),
                order_id: order.to_string(),
            }),
            [] => Err(UsageError("Missing command".into())),
            [command, ..] => Err(UsageError(format!("Invalid arguments for '{}'", command))),
        }
    }
}
