//! CRM records and their lifecycle rules.
//!
//! Pure, deterministic domain logic (no IO, no HTTP, no storage): every status
//! change goes through the `transition` function of its status enum, and every
//! update through the record's `apply_update`.

pub mod contact;
pub mod customer;
pub mod lead;
pub mod task;
pub mod ticket;

pub use contact::{Contact, ContactPatch};
pub use customer::{Customer, NewCustomer};
pub use lead::{Lead, LeadDraft, LeadPatch, LeadStatus, NewLead};
pub use task::{NewTask, Task, TaskPatch, TaskStatus, ensure_single_link};
pub use ticket::{NewTicket, Ticket, TicketPatch, TicketPriority, TicketStatus};
