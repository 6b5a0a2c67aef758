//! Sample bank domain: accounts that transfer balance to each other.
//!
//! A transfer touches two operators, the source directly and the target
//! through a nested call, so it commits atomically or not at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::{CallError, Result};
use crate::interfaces::operator::{Operator, OperatorClient, OperatorRef, Proxy};
use crate::message::Request;

/// Registered type name of `Account`.
pub const ACCOUNT_TYPE: &str = "Account";

/// Balance of a freshly created account.
pub const INITIAL_BALANCE: i64 = 10;

pub const METHOD_ADD_BALANCE: &str = "AddBalance";
pub const METHOD_TRANSFER_BALANCE: &str = "TransferBalance";
pub const METHOD_BALANCE: &str = "Balance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddBalance {
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBalance {
    /// Id of the receiving account.
    pub to: String,
    pub amount: i64,
}

/// Balances of both accounts after a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transferred {
    pub from: i64,
    pub to: i64,
}

/// Bank account operator.
///
/// `TransferBalance` credits the receiver through a nested call before
/// debiting itself. A transfer to the same account is not a net-zero no-op:
/// the nested call reaches an account that is already executing, so the
/// transfer fails with `ErrorKind::Reentrant` and nothing changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub balance: i64,
}

impl Account {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            balance: INITIAL_BALANCE,
        }
    }

    fn add_balance(&mut self, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(CallError::business("amount cannot be negative"));
        }
        self.balance += amount;
        Ok(self.balance)
    }

    async fn transfer_balance(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        args: TransferBalance,
    ) -> Result<Transferred> {
        if args.amount < 0 {
            return Err(CallError::business("amount cannot be negative"));
        }
        if self.balance < args.amount {
            return Err(CallError::business("insufficient balance"));
        }

        let to = AccountProxy::bind(client.resolve(ACCOUNT_TYPE, &args.to)?);
        let received = to
            .add_balance(ctx, client, args.amount)
            .await
            .map_err(|e| e.context(format!("add balance to {}", args.to)))?;

        self.balance -= args.amount;
        Ok(Transferred {
            from: self.balance,
            to: received,
        })
    }
}

#[async_trait]
impl Operator for Account {
    async fn handle(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        request: &Request,
    ) -> Result<Vec<u8>> {
        match request.method.as_str() {
            METHOD_ADD_BALANCE => {
                let args: AddBalance = serde_json::from_slice(&request.args)?;
                Ok(serde_json::to_vec(&self.add_balance(args.amount)?)?)
            }
            METHOD_TRANSFER_BALANCE => {
                let args: TransferBalance = serde_json::from_slice(&request.args)?;
                let transferred = self.transfer_balance(ctx, client, args).await?;
                Ok(serde_json::to_vec(&transferred)?)
            }
            METHOD_BALANCE => Ok(serde_json::to_vec(&self.balance)?),
            other => Err(CallError::business(format!(
                "Account has no method {}",
                other
            ))),
        }
    }
}

/// Typed handle to an `Account`.
#[derive(Debug, Clone)]
pub struct AccountProxy {
    target: OperatorRef,
}

impl Proxy for AccountProxy {
    const TYPE_NAME: &'static str = ACCOUNT_TYPE;

    fn bind(target: OperatorRef) -> Self {
        Self { target }
    }
}

impl AccountProxy {
    pub fn id(&self) -> &str {
        self.target.id()
    }

    pub async fn add_balance(
        &self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        amount: i64,
    ) -> Result<i64> {
        self.target
            .call(ctx, client, METHOD_ADD_BALANCE, &AddBalance { amount })
            .await
    }

    pub async fn transfer_balance(
        &self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        to: &AccountProxy,
        amount: i64,
    ) -> Result<Transferred> {
        let args = TransferBalance {
            to: to.id().to_string(),
            amount,
        };
        self.target
            .call(ctx, client, METHOD_TRANSFER_BALANCE, &args)
            .await
    }

    pub async fn balance(&self, ctx: &CallContext, client: &dyn OperatorClient) -> Result<i64> {
        self.target.call(ctx, client, METHOD_BALANCE, &()).await
    }
}
