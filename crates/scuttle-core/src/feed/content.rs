//! Message content types the engine understands

use crate::feed::contact::{ContactAction, ContactActions};
use crate::identity::IdentityRef;
use serde_json::{json, Value};

/// `{"type": "contact", ...}`: a change in how the author relates to someone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactContent {
    contact: IdentityRef,
    actions: ContactActions,
}

impl ContactContent {
    pub fn new(contact: IdentityRef, actions: ContactActions) -> Self {
        Self { contact, actions }
    }

    pub fn contact(&self) -> &IdentityRef {
        &self.contact
    }

    pub fn actions(&self) -> &ContactActions {
        &self.actions
    }

    /// JSON content for publishing this change.
    pub fn to_json(&self) -> Value {
        let mut content = json!({
            "type": "contact",
            "contact": self.contact.to_string(),
        });
        for action in self.actions.iter() {
            let (key, value) = match action {
                ContactAction::Follow => ("following", true),
                ContactAction::Unfollow => ("following", false),
                ContactAction::Block => ("blocking", true),
                ContactAction::Unblock => ("blocking", false),
            };
            content[key] = Value::Bool(value);
        }
        content
    }
}

/// Content recognised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownContent {
    Contact(ContactContent),
}

impl KnownContent {
    /// Anything malformed or of another type is `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        match value.get("type")?.as_str()? {
            "contact" => parse_contact(value).map(KnownContent::Contact),
            _ => None,
        }
    }
}

fn parse_contact(value: &Value) -> Option<ContactContent> {
    let contact: IdentityRef = value.get("contact")?.as_str()?.parse().ok()?;

    let mut actions = Vec::new();
    match value.get("following").and_then(Value::as_bool) {
        Some(true) => actions.push(ContactAction::Follow),
        Some(false) => actions.push(ContactAction::Unfollow),
        None => {}
    }
    match value.get("blocking").and_then(Value::as_bool) {
        Some(true) => actions.push(ContactAction::Block),
        Some(false) => actions.push(ContactAction::Unblock),
        None => {}
    }

    ContactActions::new(actions)
        .ok()
        .map(|actions| ContactContent::new(contact, actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateIdentity;

    #[test]
    fn test_parse_follow() {
        let target = PrivateIdentity::from_seed(&[5; 32]).identity();
        let value = json!({"type": "contact", "contact": target.to_string(), "following": true});

        let Some(KnownContent::Contact(contact)) = KnownContent::parse(&value) else {
            panic!("expected contact content");
        };
        assert_eq!(contact.contact(), &target);
        assert_eq!(
            contact.actions().iter().copied().collect::<Vec<_>>(),
            vec![ContactAction::Follow]
        );
    }

    #[test]
    fn test_parse_follow_and_unblock() {
        let target = PrivateIdentity::from_seed(&[5; 32]).identity();
        let value = json!({
            "type": "contact",
            "contact": target.to_string(),
            "following": true,
            "blocking": false,
        });

        let Some(KnownContent::Contact(contact)) = KnownContent::parse(&value) else {
            panic!("expected contact content");
        };
        assert_eq!(
            contact.actions().iter().copied().collect::<Vec<_>>(),
            vec![ContactAction::Follow, ContactAction::Unblock]
        );
    }

    #[test]
    fn test_parse_rejects_unknown_or_malformed() {
        let target = PrivateIdentity::from_seed(&[5; 32]).identity();

        assert!(KnownContent::parse(&json!({"type": "post", "text": "hi"})).is_none());
        assert!(KnownContent::parse(&json!("private box")).is_none());
        assert!(KnownContent::parse(&json!({"type": "contact", "contact": "nope", "following": true})).is_none());
        assert!(KnownContent::parse(&json!({"type": "contact", "contact": target.to_string()})).is_none());
    }

    #[test]
    fn test_to_json_parses_back() {
        let target = PrivateIdentity::from_seed(&[6; 32]).identity();
        let content = ContactContent::new(
            target,
            ContactActions::new(vec![ContactAction::Unfollow, ContactAction::Block]).unwrap(),
        );

        let value = content.to_json();
        assert_eq!(value["following"], json!(false));
        assert_eq!(value["blocking"], json!(true));
        assert_eq!(KnownContent::parse(&value), Some(KnownContent::Contact(content)));
    }
}
