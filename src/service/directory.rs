use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::{info, warn};

use crate::database::UnitOfWork;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Account, AccountLookup, AccountProfile, NewAccount, ProfileUpdate, Product, Role,
};
use crate::pin::{hash_pin, verify_pin, PinMatch};

use super::{lock_existing_account, resolve_account, LedgerService, USER_NOT_FOUND};

const DATE_OF_BIRTH_FORMAT: &str = "%d/%m/%Y";
const DEFAULT_EMPLOYEE_PREFIX: &str = "NV";

const KEY_REQUIRED: &str = "Employee id or card id is required";
const CARD_ID_REQUIRED: &str = "Card id is required";
const PIN_REQUIRED: &str = "PIN is required";
const INVALID_PIN: &str = "Invalid PIN";
const ADMIN_NOT_FOUND: &str = "Admin not found";
const SAME_PIN: &str = "New PIN must differ from the current PIN";

/// Parse a date of birth in `dd/MM/yyyy` notation.
pub fn parse_date_of_birth(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_OF_BIRTH_FORMAT).ok()
}

pub fn format_date_of_birth(date: &NaiveDate) -> String {
    date.format(DATE_OF_BIRTH_FORMAT).to_string()
}

/// A date of birth that does not parse is skipped, it never fails the update.
fn apply_date_of_birth(account: &mut Account, value: &str) {
    if value.trim().is_empty() {
        return;
    }
    match parse_date_of_birth(value) {
        Some(date) => account.date_of_birth = Some(date),
        None => warn!(
            "Ignoring malformed date of birth '{}' for {}",
            value, account.employee_id
        ),
    }
}

fn require(value: &str, reason: &'static str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(ServiceError::InvalidInput(reason.to_owned()))
    } else {
        Ok(value.to_owned())
    }
}

async fn profile_of(unit: &mut dyn UnitOfWork, account: Account) -> ServiceResult<AccountProfile> {
    let department = unit
        .get_departments()
        .await?
        .into_iter()
        .find(|d| d.id == account.department_id)
        .map(|d| d.name);
    let position = unit
        .get_positions()
        .await?
        .into_iter()
        .find(|p| p.id == account.position_id)
        .map(|p| p.name);

    Ok(AccountProfile {
        account,
        department,
        position,
    })
}

/// Lock the administrator account, accounts without the admin role are not found.
async fn lock_admin(unit: &mut dyn UnitOfWork, admin_id: &str) -> ServiceResult<Account> {
    let admin = resolve_account(unit, &AccountLookup::EmployeeId(admin_id.to_owned()))
        .await?
        .filter(|account| account.role == Role::Admin)
        .ok_or_else(|| ServiceError::NotFound(ADMIN_NOT_FOUND.to_owned()))?;

    unit.lock_account(admin.id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(ADMIN_NOT_FOUND.to_owned()))
}

/// Check the PIN of an administrator account.
///
/// A PIN that is still stored in plaintext is replaced by its hash once it matched.
async fn authorize_admin(
    unit: &mut dyn UnitOfWork,
    admin_id: &str,
    pin: &str,
) -> ServiceResult<Account> {
    let mut admin = lock_admin(unit, admin_id).await?;

    let stored = admin.pin_hash.clone().unwrap_or_default();
    match verify_pin(&stored, pin)? {
        PinMatch::Hashed => Ok(admin),
        PinMatch::LegacyPlaintext => {
            admin.pin_hash = Some(hash_pin(pin)?);
            unit.update_account(&admin).await?;
            info!("Upgraded plaintext PIN of {} to a hash", admin.employee_id);
            Ok(admin)
        }
        PinMatch::Mismatch => Err(ServiceError::Unauthorized(INVALID_PIN.to_owned())),
    }
}

impl LedgerService {
    /// Profile of the account with the given card id or employee id.
    pub async fn get_account(&self, key: &str) -> ServiceResult<AccountProfile> {
        let lookup = AccountLookup::from_terminal_key(key.trim());
        self.atomically("get account", move |unit| {
            let lookup = lookup.clone();
            Box::pin(async move {
                let account = resolve_account(unit, &lookup)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(USER_NOT_FOUND.to_owned()))?;
                profile_of(unit, account).await
            })
        })
        .await
    }

    pub async fn list_accounts(&self) -> ServiceResult<Vec<AccountProfile>> {
        self.atomically("list accounts", |unit| {
            Box::pin(async move { unit.get_account_profiles().await })
        })
        .await
    }

    /// Update the name and, if it is valid, the date of birth of a card holder.
    pub async fn update_card_holder(
        &self,
        card_id: &str,
        name: &str,
        date_of_birth: &str,
    ) -> ServiceResult<Account> {
        let lookup = AccountLookup::CardId(card_id.trim().to_owned());
        let name = name.trim().to_owned();
        let date_of_birth = date_of_birth.to_owned();

        let account = self
            .atomically("update card holder", move |unit| {
                let lookup = lookup.clone();
                let name = name.clone();
                let date_of_birth = date_of_birth.clone();
                Box::pin(async move {
                    let mut account = lock_existing_account(unit, &lookup).await?;
                    account.name = name;
                    apply_date_of_birth(&mut account, &date_of_birth);
                    unit.update_account(&account).await?;
                    Ok(account)
                })
            })
            .await?;

        info!("Updated card holder {}", account.card_id);
        Ok(account)
    }

    /// Apply the admin profile editor to the account with the given employee id, or card id if
    /// no employee id is given.
    ///
    /// Unknown department and position names are left unchanged.
    pub async fn update_profile(&self, update: ProfileUpdate) -> ServiceResult<Account> {
        let lookup = if !update.employee_id.trim().is_empty() {
            AccountLookup::EmployeeId(update.employee_id.trim().to_owned())
        } else if !update.card_id.trim().is_empty() {
            AccountLookup::CardId(update.card_id.trim().to_owned())
        } else {
            return Err(ServiceError::InvalidInput(KEY_REQUIRED.to_owned()));
        };

        let account = self
            .atomically("update profile", move |unit| {
                let lookup = lookup.clone();
                let update = update.clone();
                Box::pin(async move {
                    let mut account = lock_existing_account(unit, &lookup).await?;

                    if !update.name.trim().is_empty() {
                        account.name = update.name.trim().to_owned();
                    }
                    account.default_pin = update.default_pin;
                    apply_date_of_birth(&mut account, &update.date_of_birth);

                    let department = update.department.trim();
                    if !department.is_empty() {
                        match unit
                            .get_departments()
                            .await?
                            .into_iter()
                            .find(|d| d.name.eq_ignore_ascii_case(department))
                        {
                            Some(d) => account.department_id = d.id,
                            None => warn!("Ignoring unknown department '{}'", department),
                        }
                    }

                    let position = update.position.trim();
                    if !position.is_empty() {
                        match unit
                            .get_positions()
                            .await?
                            .into_iter()
                            .find(|p| p.name.eq_ignore_ascii_case(position))
                        {
                            Some(p) => account.position_id = p.id,
                            None => warn!("Ignoring unknown position '{}'", position),
                        }
                    }

                    unit.update_account(&account).await?;
                    Ok(account)
                })
            })
            .await?;

        info!("Updated profile of {}", account.employee_id);
        Ok(account)
    }

    pub async fn change_status(&self, card_id: &str, active: bool) -> ServiceResult<Account> {
        self.update_by_card_id("change status", card_id, move |account| {
            account.active = active;
        })
        .await
    }

    /// Record that the card holder replaced the default PIN.
    pub async fn mark_pin_changed(&self, card_id: &str) -> ServiceResult<Account> {
        let card_id = require(card_id, CARD_ID_REQUIRED)?;
        self.update_by_card_id("mark pin changed", &card_id, |account| {
            account.default_pin = false;
        })
        .await
    }

    pub async fn set_default_pin(&self, card_id: &str, default_pin: bool) -> ServiceResult<Account> {
        let card_id = require(card_id, CARD_ID_REQUIRED)?;
        self.update_by_card_id("set default pin", &card_id, move |account| {
            account.default_pin = default_pin;
        })
        .await
    }

    async fn update_by_card_id<F>(
        &self,
        operation: &str,
        card_id: &str,
        change: F,
    ) -> ServiceResult<Account>
    where
        F: Fn(&mut Account) + Copy + Send + 'static,
    {
        let lookup = AccountLookup::CardId(card_id.trim().to_owned());

        let account = self
            .atomically(operation, move |unit| {
                let lookup = lookup.clone();
                Box::pin(async move {
                    let mut account = lock_existing_account(unit, &lookup).await?;
                    change(&mut account);
                    unit.update_account(&account).await?;
                    Ok(account)
                })
            })
            .await?;

        info!("{} on card {}", operation, account.card_id);
        Ok(account)
    }

    /// Log an administrator in.
    pub async fn verify_admin_pin(&self, admin_id: &str, pin: &str) -> ServiceResult<Account> {
        let admin_id = require(admin_id, KEY_REQUIRED)?;
        let pin = require(pin, PIN_REQUIRED)?;

        let result = self
            .atomically("verify admin pin", move |unit| {
                let admin_id = admin_id.clone();
                let pin = pin.clone();
                Box::pin(async move { authorize_admin(unit, &admin_id, &pin).await })
            })
            .await;

        if let Err(ServiceError::Unauthorized(reason)) = &result {
            warn!("Admin login rejected: {}", reason);
        }
        result
    }

    /// Replace the PIN of an administrator.
    pub async fn change_admin_pin(&self, admin_id: &str, new_pin: &str) -> ServiceResult<()> {
        let admin_id = require(admin_id, KEY_REQUIRED)?;
        let new_pin = require(new_pin, PIN_REQUIRED)?;
        let locked_id = admin_id.clone();

        self.atomically("change admin pin", move |unit| {
            let admin_id = locked_id.clone();
            let new_pin = new_pin.clone();
            Box::pin(async move {
                let mut admin = lock_admin(unit, &admin_id).await?;

                let stored = admin.pin_hash.clone().unwrap_or_default();
                if verify_pin(&stored, &new_pin)? != PinMatch::Mismatch {
                    return Err(ServiceError::Conflict(SAME_PIN.to_owned()));
                }

                admin.pin_hash = Some(hash_pin(&new_pin)?);
                admin.default_pin = false;
                unit.update_account(&admin).await
            })
        })
        .await?;

        info!("Changed PIN of {}", admin_id);
        Ok(())
    }

    /// Create the administrator account unless it already exists.
    pub async fn create_admin(
        &self,
        card_id: &str,
        employee_id: &str,
        name: &str,
        pin: &str,
    ) -> ServiceResult<Account> {
        let pin_hash = hash_pin(&require(pin, PIN_REQUIRED)?)?;
        let new_admin = NewAccount {
            card_id: require(card_id, CARD_ID_REQUIRED)?,
            employee_id: require(employee_id, KEY_REQUIRED)?,
            name: name.trim().to_owned(),
            role: Role::Admin,
            public_key: None,
            pin_hash: Some(pin_hash),
        };

        let (admin, created) = self
            .atomically("create admin", move |unit| {
                let new_admin = new_admin.clone();
                Box::pin(async move {
                    if let Some(admin) = unit
                        .find_account_by_employee_id(&new_admin.employee_id)
                        .await?
                    {
                        return Ok((admin, false));
                    }
                    Ok((unit.insert_account(new_admin).await?, true))
                })
            })
            .await?;

        if created {
            info!("Created administrator {}", admin.employee_id);
        }
        Ok(admin)
    }

    /// Delete a card holder together with their journal and attendance sessions.
    pub async fn delete_account(
        &self,
        admin_id: &str,
        admin_pin: &str,
        target_card_id: &str,
    ) -> ServiceResult<Account> {
        let admin_id = require(admin_id, KEY_REQUIRED)?;
        let admin_pin = require(admin_pin, PIN_REQUIRED)?;
        let target = AccountLookup::CardId(require(target_card_id, CARD_ID_REQUIRED)?);

        let result = self
            .atomically("delete account", move |unit| {
                let admin_id = admin_id.clone();
                let admin_pin = admin_pin.clone();
                let target = target.clone();
                Box::pin(async move {
                    authorize_admin(unit, &admin_id, &admin_pin).await?;
                    let account = lock_existing_account(unit, &target).await?;
                    unit.delete_account(account.id).await?;
                    Ok(account)
                })
            })
            .await;

        match &result {
            Ok(account) => info!(
                "Deleted account {} of {}",
                account.card_id, account.employee_id
            ),
            Err(ServiceError::Unauthorized(reason)) => warn!("Deletion rejected: {}", reason),
            Err(_) => {}
        }
        result
    }

    /// Suggest the next free employee id for a prefix, e.g. `NV004`.
    pub async fn next_employee_id(&self, prefix: Option<&str>) -> ServiceResult<String> {
        let prefix = prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_EMPLOYEE_PREFIX)
            .to_uppercase();

        let counted_prefix = prefix.clone();
        let count = self
            .atomically("next employee id", move |unit| {
                let prefix = counted_prefix.clone();
                Box::pin(async move { unit.count_employee_ids_with_prefix(&prefix).await })
            })
            .await?;

        Ok(format!("{}{:03}", prefix, count + 1))
    }

    pub async fn list_departments(&self) -> ServiceResult<BTreeMap<i64, String>> {
        let departments = self
            .atomically("list departments", |unit| {
                Box::pin(async move { unit.get_departments().await })
            })
            .await?;
        Ok(departments.into_iter().map(|d| (d.id, d.name)).collect())
    }

    pub async fn list_positions(&self) -> ServiceResult<BTreeMap<i64, String>> {
        let positions = self
            .atomically("list positions", |unit| {
                Box::pin(async move { unit.get_positions().await })
            })
            .await?;
        Ok(positions.into_iter().map(|p| (p.id, p.name)).collect())
    }

    /// Products that can currently be bought.
    pub async fn list_products(&self) -> ServiceResult<Vec<Product>> {
        self.atomically("list products", |unit| {
            Box::pin(async move { unit.get_available_products().await })
        })
        .await
    }
}
