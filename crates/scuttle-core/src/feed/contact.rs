//! Contact relation between two identities

use crate::error::{ReplicationError, ReplicationResult};
use crate::identity::IdentityRef;
use serde::{Deserialize, Serialize};

/// Single change to a contact relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactAction {
    Follow,
    Unfollow,
    Block,
    Unblock,
}

/// Non-empty, ordered list of actions taken from one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactActions(Vec<ContactAction>);

impl ContactActions {
    pub fn new(actions: Vec<ContactAction>) -> ReplicationResult<Self> {
        if actions.is_empty() {
            return Err(ReplicationError::InvalidValue(
                "contact actions can not be empty".to_string(),
            ));
        }
        Ok(Self(actions))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContactAction> {
        self.0.iter()
    }
}

/// How `who` relates to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    who: IdentityRef,
    target: IdentityRef,
    following: bool,
    blocking: bool,
}

impl Contact {
    /// A relation with neither flag set.
    pub fn new(who: IdentityRef, target: IdentityRef) -> ReplicationResult<Self> {
        Self::from_history(who, target, false, false)
    }

    /// A relation restored from already applied actions.
    pub fn from_history(
        who: IdentityRef,
        target: IdentityRef,
        following: bool,
        blocking: bool,
    ) -> ReplicationResult<Self> {
        if who == target {
            return Err(ReplicationError::InvalidValue(format!(
                "{} can not be its own contact",
                who
            )));
        }
        Ok(Self {
            who,
            target,
            following,
            blocking,
        })
    }

    pub fn who(&self) -> &IdentityRef {
        &self.who
    }

    pub fn target(&self) -> &IdentityRef {
        &self.target
    }

    pub fn following(&self) -> bool {
        self.following
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    /// Apply actions in order. Each action only touches its own flag.
    pub fn update(&mut self, actions: &ContactActions) {
        for action in actions.iter() {
            match action {
                ContactAction::Follow => self.following = true,
                ContactAction::Unfollow => self.following = false,
                ContactAction::Block => self.blocking = true,
                ContactAction::Unblock => self.blocking = false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateIdentity;

    fn identity(seed: u8) -> IdentityRef {
        PrivateIdentity::from_seed(&[seed; 32]).identity()
    }

    fn actions(actions: &[ContactAction]) -> ContactActions {
        ContactActions::new(actions.to_vec()).unwrap()
    }

    #[test]
    fn test_from_history() {
        let c = Contact::from_history(identity(1), identity(2), true, false).unwrap();
        assert_eq!(c.target(), &identity(2));
        assert!(c.following());
        assert!(!c.blocking());

        let c = Contact::from_history(identity(1), identity(2), false, true).unwrap();
        assert!(!c.following());
        assert!(c.blocking());
    }

    #[test]
    fn test_contact_with_self_is_rejected() {
        assert!(Contact::new(identity(1), identity(1)).is_err());
    }

    #[test]
    fn test_empty_actions_are_rejected() {
        assert!(ContactActions::new(vec![]).is_err());
    }

    #[test]
    fn test_single_actions() {
        use ContactAction::*;

        let cases = [
            (Follow, true, false),
            (Unfollow, false, false),
            (Block, false, true),
            (Unblock, false, false),
        ];

        for (action, following, blocking) in cases {
            let mut contact = Contact::new(identity(1), identity(2)).unwrap();
            contact.update(&actions(&[action]));
            assert_eq!(contact.following(), following, "{:?}", action);
            assert_eq!(contact.blocking(), blocking, "{:?}", action);
        }
    }

    #[test]
    fn test_actions_apply_in_order_and_flags_are_independent() {
        use ContactAction::*;

        let mut contact = Contact::new(identity(1), identity(2)).unwrap();
        contact.update(&actions(&[Follow, Block]));
        assert!(contact.following());
        assert!(contact.blocking());

        contact.update(&actions(&[Unblock]));
        assert!(contact.following());
        assert!(!contact.blocking());

        contact.update(&actions(&[Unfollow, Follow, Unfollow]));
        assert!(!contact.following());
    }

    #[test]
    fn test_actions_are_idempotent() {
        use ContactAction::*;

        let mut once = Contact::new(identity(1), identity(2)).unwrap();
        once.update(&actions(&[Follow]));

        let mut twice = Contact::new(identity(1), identity(2)).unwrap();
        twice.update(&actions(&[Follow, Follow]));

        assert_eq!(once, twice);
    }
}
