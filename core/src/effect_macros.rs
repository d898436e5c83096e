//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Future` from an async block body
///
/// The body is moved into an `async move` block and must evaluate to
/// `Option<Action>`.
///
/// # Example
///
/// ```rust,ignore
/// use passgate_core::async_effect;
///
/// let repository = Arc::clone(&env.repository);
/// async_effect! {
///     match repository.mark_redeemed(ticket_id, &redemption).await {
///         Ok(RedeemOutcome::Redeemed) => Some(PassAction::TicketRedeemed { redemption }),
///         Ok(_) | Err(_) => None,
///     }
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { $($body)* }))
    };
}
