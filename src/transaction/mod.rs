pub mod lock;
pub mod state;

pub use lock::{TxHandle, TxLock, TxStats, Transactional, bind_to_transaction};
pub use state::{Transaction, TransactionId, TxAction, TxState};
