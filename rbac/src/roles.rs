//! The fixed role hierarchy and its permission sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    User,
    Operator,
    Admin,
    Master,
    Auditor,
    Recovery,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Viewer,
        Role::User,
        Role::Operator,
        Role::Admin,
        Role::Master,
        Role::Auditor,
        Role::Recovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::User => "user",
            Self::Operator => "operator",
            Self::Admin => "admin",
            Self::Master => "master",
            Self::Auditor => "auditor",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewWalletInfo,
    ViewBalance,
    ViewTransactionHistory,
    ViewKeyInfo,

    SendTransaction,
    SignTransaction,
    BroadcastTransaction,

    GenerateKey,
    ImportKey,
    ExportKey,
    DeleteKey,
    RotateKey,

    CreateWallet,
    DeleteWallet,
    BackupWallet,
    RestoreWallet,
    ChangePassphrase,

    AssignRole,
    RevokeRole,
    ModifyRole,
    ViewRoles,

    ViewAuditLog,
    ExportAuditLog,

    EmergencyRecovery,
    ResetWallet,

    CreateMultisig,
    ManageMultisig,
    SignMultisig,
}

impl Permission {
    pub const ALL: [Permission; 28] = [
        Permission::ViewWalletInfo,
        Permission::ViewBalance,
        Permission::ViewTransactionHistory,
        Permission::ViewKeyInfo,
        Permission::SendTransaction,
        Permission::SignTransaction,
        Permission::BroadcastTransaction,
        Permission::GenerateKey,
        Permission::ImportKey,
        Permission::ExportKey,
        Permission::DeleteKey,
        Permission::RotateKey,
        Permission::CreateWallet,
        Permission::DeleteWallet,
        Permission::BackupWallet,
        Permission::RestoreWallet,
        Permission::ChangePassphrase,
        Permission::AssignRole,
        Permission::RevokeRole,
        Permission::ModifyRole,
        Permission::ViewRoles,
        Permission::ViewAuditLog,
        Permission::ExportAuditLog,
        Permission::EmergencyRecovery,
        Permission::ResetWallet,
        Permission::CreateMultisig,
        Permission::ManageMultisig,
        Permission::SignMultisig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewWalletInfo => "view_wallet_info",
            Self::ViewBalance => "view_balance",
            Self::ViewTransactionHistory => "view_transaction_history",
            Self::ViewKeyInfo => "view_key_info",
            Self::SendTransaction => "send_transaction",
            Self::SignTransaction => "sign_transaction",
            Self::BroadcastTransaction => "broadcast_transaction",
            Self::GenerateKey => "generate_key",
            Self::ImportKey => "import_key",
            Self::ExportKey => "export_key",
            Self::DeleteKey => "delete_key",
            Self::RotateKey => "rotate_key",
            Self::CreateWallet => "create_wallet",
            Self::DeleteWallet => "delete_wallet",
            Self::BackupWallet => "backup_wallet",
            Self::RestoreWallet => "restore_wallet",
            Self::ChangePassphrase => "change_passphrase",
            Self::AssignRole => "assign_role",
            Self::RevokeRole => "revoke_role",
            Self::ModifyRole => "modify_role",
            Self::ViewRoles => "view_roles",
            Self::ViewAuditLog => "view_audit_log",
            Self::ExportAuditLog => "export_audit_log",
            Self::EmergencyRecovery => "emergency_recovery",
            Self::ResetWallet => "reset_wallet",
            Self::CreateMultisig => "create_multisig",
            Self::ManageMultisig => "manage_multisig",
            Self::SignMultisig => "sign_multisig",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Denied,
    ReadOnly,
    Limited,
    Standard,
    Elevated,
    Admin,
    Master,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: Role,
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<Permission>,
    pub access_level: AccessLevel,
    pub max_session_secs: u64,
    /// Roles a session under this role may assign and revoke.
    pub assignable: BTreeSet<Role>,
    pub requires_mfa: bool,
    pub requires_approval: bool,
    pub active: bool,
}

impl RoleDefinition {
    fn new(
        role: Role,
        name: &str,
        description: &str,
        access_level: AccessLevel,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            role,
            name: name.to_string(),
            description: description.to_string(),
            permissions: permissions.into_iter().collect(),
            access_level,
            max_session_secs: 8 * 3600,
            assignable: BTreeSet::new(),
            requires_mfa: false,
            requires_approval: false,
            active: true,
        }
    }

    fn assigns(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.assignable = roles.into_iter().collect();
        self
    }

    fn mfa(mut self) -> Self {
        self.requires_mfa = true;
        self
    }

    fn approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn can_assign(&self, role: Role) -> bool {
        self.assignable.contains(&role)
    }

    /// The seven standard roles. Roles that may assign others carry the
    /// assign and revoke permissions; only master may modify roles.
    pub fn builtin() -> Vec<RoleDefinition> {
        use Permission::*;

        const VIEW: [Permission; 4] = [ViewWalletInfo, ViewBalance, ViewTransactionHistory, ViewKeyInfo];

        let user = VIEW
            .into_iter()
            .chain([SendTransaction, SignTransaction, BackupWallet, SignMultisig]);
        let operator = VIEW.into_iter().chain([
            SendTransaction,
            SignTransaction,
            BroadcastTransaction,
            GenerateKey,
            ImportKey,
            ExportKey,
            DeleteKey,
            RotateKey,
            BackupWallet,
            RestoreWallet,
            ChangePassphrase,
            SignMultisig,
            AssignRole,
            RevokeRole,
            ViewRoles,
        ]);
        let admin = Permission::ALL.into_iter().filter(|p| *p != ModifyRole);

        vec![
            RoleDefinition::new(
                Role::Viewer,
                "Wallet Viewer",
                "Read-only access to wallet information",
                AccessLevel::ReadOnly,
                VIEW,
            ),
            RoleDefinition::new(
                Role::User,
                "Wallet User",
                "Standard wallet operations",
                AccessLevel::Standard,
                user,
            ),
            RoleDefinition::new(
                Role::Operator,
                "Wallet Operator",
                "Key and wallet management",
                AccessLevel::Elevated,
                operator,
            )
            .assigns([Role::Viewer, Role::User]),
            RoleDefinition::new(
                Role::Admin,
                "Wallet Administrator",
                "Administrative operations",
                AccessLevel::Admin,
                admin,
            )
            .assigns([Role::Viewer, Role::User, Role::Operator])
            .mfa(),
            RoleDefinition::new(
                Role::Master,
                "Wallet Master",
                "Full control including role management",
                AccessLevel::Master,
                Permission::ALL,
            )
            .assigns(Role::ALL)
            .mfa()
            .approval(),
            RoleDefinition::new(
                Role::Auditor,
                "Wallet Auditor",
                "Audit and compliance",
                AccessLevel::ReadOnly,
                [
                    ViewWalletInfo,
                    ViewTransactionHistory,
                    ViewKeyInfo,
                    ViewRoles,
                    ViewAuditLog,
                    ExportAuditLog,
                ],
            )
            .mfa(),
            RoleDefinition::new(
                Role::Recovery,
                "Recovery Agent",
                "Emergency recovery",
                AccessLevel::Master,
                [
                    ViewWalletInfo,
                    EmergencyRecovery,
                    ResetWallet,
                    RestoreWallet,
                    ChangePassphrase,
                ],
            )
            .mfa()
            .approval(),
        ]
    }
}
