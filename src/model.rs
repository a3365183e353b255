use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub title: String,
    pub votes: u32,
    pub voters: Vec<String>,
    pub creator: String,
}

impl Movie {
    pub fn suggested_by(title: &str, creator: &str) -> Movie {
        Movie {
            title: title.to_owned(),
            votes: 1,
            voters: vec![creator.to_owned()],
            creator: creator.to_owned(),
        }
    }

    pub fn has_voter(&self, user: &str) -> bool {
        self.voters.iter().any(|voter| voter == user)
    }

    pub fn add_voter(&mut self, user: &str) {
        if !self.has_voter(user) {
            self.voters.push(user.to_owned());
        }
        self.votes = self.voters.len() as u32;
    }

    pub fn remove_voter(&mut self, user: &str) {
        self.voters.retain(|voter| voter != user);
        self.votes = self.voters.len() as u32;
    }
}
