//! Governed reference-data CRUD
//!
//! Every create, update and delete of a wallet, user, tier, exchange rate,
//! trigger or program writes exactly one audit row in the same commit. The
//! old snapshot is read here, before the write, and handed to the store
//! together with the mutation.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::governed::{Governed, GovernedChange, GovernedKind};
use super::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use super::resolver::ReferenceResolver;
use super::validation::Slug;
use crate::audit::{Audit, AuditContext, AuditOperation, NewAudit};
use crate::context::RequestContext;
use crate::dispatcher::dead_letter::DeadLetter;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, Page};
use crate::transaction::TransactionType;

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewWallet {
    #[schema(example = "points")]
    pub id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default = "default_currency_scale")]
    #[validate(range(min = 1))]
    pub currency_scale: i32,
    #[serde(default)]
    pub is_monetary: bool,
}

fn default_currency_scale() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWallet {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(range(min = 1))]
    pub currency_scale: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTier {
    #[schema(example = "gold")]
    pub id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTier {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[schema(example = "u1")]
    pub id: String,
    pub tier_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub tier_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewExchangeRate {
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub tier_id: String,
    #[schema(value_type = String, example = "2.5")]
    pub rate: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExchangeRate {
    #[schema(value_type = String, example = "3.0")]
    pub rate: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTrigger {
    pub slug: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    pub wallet_id: Option<String>,
    pub transaction_type: TransactionType,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrigger {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    pub wallet_id: Option<String>,
    pub transaction_type: TransactionType,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewProgram {
    pub trigger_id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub condition: serde_json::Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub effects: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgram {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[schema(value_type = Object)]
    pub condition: serde_json::Value,
    #[schema(value_type = Object)]
    pub effects: serde_json::Value,
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

fn positive_rate(rate: Decimal) -> LedgerResult<Decimal> {
    if rate <= Decimal::ZERO {
        return Err(LedgerError::invalid_field("rate", "must be greater than 0"));
    }
    Ok(rate)
}

// ============================================================================
// Admin service
// ============================================================================

pub struct ReferenceAdmin {
    store: Arc<dyn LedgerStore>,
    resolver: ReferenceResolver,
}

impl ReferenceAdmin {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            store,
        }
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    // === Generic audited write path ===

    async fn create<T: Governed>(&self, audit: &AuditContext, entity: T) -> LedgerResult<T> {
        let record = entity.into_record();
        let entry = NewAudit::new(audit, T::KIND.table(), record.id(), AuditOperation::Create)
            .new_state(record.snapshot()?);
        self.store
            .apply_change(GovernedChange::Create(record.clone()), entry)
            .await?;
        tracing::info!(table = T::KIND.table(), record_id = record.id(), actor = %audit.actor, "Created");
        T::from_record(record)
    }

    /// The store records the row it replaces as `old_record`
    async fn update<T: Governed>(&self, audit: &AuditContext, new: T) -> LedgerResult<T> {
        let record = new.into_record();
        let entry = NewAudit::new(audit, T::KIND.table(), record.id(), AuditOperation::Update)
            .new_state(record.snapshot()?);
        self.store
            .apply_change(GovernedChange::Update(record.clone()), entry)
            .await?;
        tracing::info!(table = T::KIND.table(), record_id = record.id(), actor = %audit.actor, "Updated");
        T::from_record(record)
    }

    async fn delete<T: Governed>(&self, audit: &AuditContext, id: &str) -> LedgerResult<()> {
        let entry = NewAudit::new(audit, T::KIND.table(), id, AuditOperation::Delete);
        self.store
            .apply_change(GovernedChange::Delete(T::KIND, id.to_string()), entry)
            .await?;
        tracing::info!(table = T::KIND.table(), record_id = id, actor = %audit.actor, "Deleted");
        Ok(())
    }

    pub async fn get<T: Governed>(&self, ctx: &RequestContext, id: &str) -> LedgerResult<T> {
        ctx.run("get_record", self.resolver.get::<T>(id)).await
    }

    pub async fn list<T: Governed>(&self, ctx: &RequestContext, page: Page) -> LedgerResult<Vec<T>> {
        ctx.run("list_records", async {
            self.store
                .list_records(T::KIND, page)
                .await?
                .into_iter()
                .map(T::from_record)
                .collect()
        })
        .await
    }

    pub async fn remove<T: Governed>(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
    ) -> LedgerResult<()> {
        ctx.run("delete_record", self.delete::<T>(audit, id)).await
    }

    // === Wallets ===

    /// Creates the wallet and its storage namespace in one commit
    pub async fn create_wallet(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewWallet,
    ) -> LedgerResult<Wallet> {
        input.validate()?;
        let id = Slug::new("id", &input.id)?;
        let now = Utc::now();
        let wallet = Wallet {
            id: id.into_string(),
            name: input.name,
            currency_scale: input.currency_scale,
            is_monetary: input.is_monetary,
            created_at: now,
            updated_at: now,
        };
        ctx.run("create_wallet", self.create(audit, wallet)).await
    }

    pub async fn update_wallet(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateWallet,
    ) -> LedgerResult<Wallet> {
        input.validate()?;
        ctx.run("update_wallet", async {
            let old = self.resolver.wallet(id).await?;
            let new = Wallet {
                name: input.name,
                currency_scale: input.currency_scale,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Tiers ===

    pub async fn create_tier(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewTier,
    ) -> LedgerResult<Tier> {
        input.validate()?;
        let id = Slug::new("id", &input.id)?;
        let now = Utc::now();
        let tier = Tier {
            id: id.into_string(),
            name: input.name,
            description: input.description,
            created_at: now,
            updated_at: now,
        };
        ctx.run("create_tier", self.create(audit, tier)).await
    }

    pub async fn update_tier(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateTier,
    ) -> LedgerResult<Tier> {
        input.validate()?;
        ctx.run("update_tier", async {
            let old = self.resolver.tier(id).await?;
            let new = Tier {
                name: input.name,
                description: input.description,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Users ===

    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewUser,
    ) -> LedgerResult<User> {
        input.validate()?;
        let id = Slug::new("id", &input.id)?;
        ctx.run("create_user", async {
            if let Some(tier_id) = &input.tier_id {
                self.resolver.tier(tier_id).await?;
            }
            let now = Utc::now();
            let user = User {
                id: id.into_string(),
                tier_id: input.tier_id,
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            };
            self.create(audit, user).await
        })
        .await
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateUser,
    ) -> LedgerResult<User> {
        input.validate()?;
        ctx.run("update_user", async {
            let old = self.resolver.user(id).await?;
            if let Some(tier_id) = &input.tier_id {
                self.resolver.tier(tier_id).await?;
            }
            let new = User {
                tier_id: input.tier_id,
                is_active: input.is_active,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Exchange rates ===

    pub async fn create_exchange_rate(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewExchangeRate,
    ) -> LedgerResult<ExchangeRate> {
        input.validate()?;
        let rate = positive_rate(input.rate)?;
        if input.from_wallet_id == input.to_wallet_id {
            return Err(LedgerError::invalid_field(
                "toWalletId",
                "must differ from fromWalletId",
            ));
        }
        ctx.run("create_exchange_rate", async {
            self.resolver.wallet(&input.from_wallet_id).await?;
            self.resolver.wallet(&input.to_wallet_id).await?;
            self.resolver.tier(&input.tier_id).await?;
            let now = Utc::now();
            let exchange_rate = ExchangeRate {
                id: ulid::Ulid::new().to_string(),
                from_wallet_id: input.from_wallet_id,
                to_wallet_id: input.to_wallet_id,
                tier_id: input.tier_id,
                rate,
                created_at: now,
                updated_at: now,
            };
            self.create(audit, exchange_rate).await
        })
        .await
    }

    pub async fn update_exchange_rate(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateExchangeRate,
    ) -> LedgerResult<ExchangeRate> {
        let rate = positive_rate(input.rate)?;
        ctx.run("update_exchange_rate", async {
            let old = self.resolver.get::<ExchangeRate>(id).await?;
            let new = ExchangeRate {
                rate,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Triggers ===

    pub async fn create_trigger(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewTrigger,
    ) -> LedgerResult<Trigger> {
        input.validate()?;
        let slug = Slug::new("slug", &input.slug)?;
        ctx.run("create_trigger", async {
            if let Some(wallet_id) = &input.wallet_id {
                self.resolver.wallet(wallet_id).await?;
            }
            let now = Utc::now();
            let trigger = Trigger {
                id: ulid::Ulid::new().to_string(),
                slug: slug.into_string(),
                name: input.name,
                description: input.description,
                wallet_id: input.wallet_id,
                transaction_type: input.transaction_type,
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            };
            self.create(audit, trigger).await
        })
        .await
    }

    pub async fn update_trigger(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateTrigger,
    ) -> LedgerResult<Trigger> {
        input.validate()?;
        ctx.run("update_trigger", async {
            let old = self.resolver.trigger(id).await?;
            if let Some(wallet_id) = &input.wallet_id {
                self.resolver.wallet(wallet_id).await?;
            }
            let new = Trigger {
                name: input.name,
                description: input.description,
                wallet_id: input.wallet_id,
                transaction_type: input.transaction_type,
                is_active: input.is_active,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Programs ===

    pub async fn create_program(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        input: NewProgram,
    ) -> LedgerResult<Program> {
        input.validate()?;
        ctx.run("create_program", async {
            self.resolver.trigger(&input.trigger_id).await?;
            let now = Utc::now();
            let program = Program {
                id: ulid::Ulid::new().to_string(),
                trigger_id: input.trigger_id,
                name: input.name,
                condition: input.condition,
                effects: input.effects,
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            };
            self.create(audit, program).await
        })
        .await
    }

    pub async fn update_program(
        &self,
        ctx: &RequestContext,
        audit: &AuditContext,
        id: &str,
        input: UpdateProgram,
    ) -> LedgerResult<Program> {
        input.validate()?;
        ctx.run("update_program", async {
            let old = self.resolver.program(id).await?;
            let new = Program {
                name: input.name,
                condition: input.condition,
                effects: input.effects,
                is_active: input.is_active,
                updated_at: Utc::now(),
                ..old
            };
            self.update(audit, new).await
        })
        .await
    }

    // === Audit queries ===

    /// Audit trail of one record, oldest first
    pub async fn audit_for_record(
        &self,
        ctx: &RequestContext,
        table: &str,
        record_id: &str,
    ) -> LedgerResult<Vec<Audit>> {
        let kind = GovernedKind::from_table(table)
            .ok_or_else(|| LedgerError::invalid_field("table", format!("unknown table: {}", table)))?;
        ctx.run("audit_for_record", self.store.audit_for_record(kind.table(), record_id))
            .await
    }

    pub async fn list_audit(&self, ctx: &RequestContext, page: Page) -> LedgerResult<Vec<Audit>> {
        ctx.run("list_audit", self.store.list_audit(page)).await
    }

    pub async fn list_dead_letters(
        &self,
        ctx: &RequestContext,
        page: Page,
    ) -> LedgerResult<Vec<DeadLetter>> {
        ctx.run("list_dead_letters", self.store.list_dead_letters(page))
            .await
    }
}
