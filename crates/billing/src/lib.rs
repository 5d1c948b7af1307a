//! Billing domain module (event-sourced).
//!
//! Invoices derived from claimed treatment records, payments against them,
//! and cancellation. Deterministic domain logic only: no IO, no HTTP, no
//! storage.

pub mod invoice;
pub mod money;

pub use invoice::{
    CancelInvoice, Invoice, InvoiceCancelled, InvoiceCommand, InvoiceEvent, InvoiceIssued,
    InvoiceLine, InvoiceStatus, IssueInvoice, Payment, PaymentId, PaymentMethod,
    PaymentRegistered, RegisterPayment,
};
pub use money::{Totals, invoice_totals, round2};
