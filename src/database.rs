use crate::model::*;
use sled::transaction::{abort, TransactionError, Transactional};

fn serialize_id(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> u64 {
    use std::convert::TryInto;
    u64::from_le_bytes(id.as_ref().try_into().unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestOutcome {
    Created(u64),
    AlreadySuggested,
    DuplicateTitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast,
    Retracted,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotCreator,
}

enum DeleteAbort {
    NotFound,
    NotCreator,
}

pub trait MovieDb {
    type Error;
    fn add_movie(&self, title: &str, creator: &str) -> Result<SuggestOutcome, Self::Error>;
    fn get_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
    fn all_movies(&self) -> Result<Vec<(u64, Movie)>, Self::Error>;
    fn movie_suggested_by(&self, user: &str) -> Result<Option<(u64, Movie)>, Self::Error>;
    fn active_vote_of(&self, user: &str) -> Result<Option<u64>, Self::Error>;
    fn toggle_vote(&self, id: u64, user: &str) -> Result<VoteOutcome, Self::Error>;
    fn remove_movie(&self, id: u64, user: &str) -> Result<DeleteOutcome, Self::Error>;
}

const MOVIES: &'static [u8] = b"movies";
const MOVIES_TITLE: &'static [u8] = b"movies_title";
const MOVIES_VOTER: &'static [u8] = b"movies_voter";

impl MovieDb for sled::Db {
    type Error = sled::Error;

    fn add_movie(&self, title: &str, creator: &str) -> sled::Result<SuggestOutcome> {
        if self.movie_suggested_by(creator)?.is_some() {
            return Ok(SuggestOutcome::AlreadySuggested);
        }
        let movies = self.open_tree(MOVIES)?;
        let titles = self.open_tree(MOVIES_TITLE)?;
        let voters = self.open_tree(MOVIES_VOTER)?;
        let id = self.generate_id()?;
        let movie = Movie::suggested_by(title, creator);
        if let Err(err) = (&movies, &titles, &voters).transaction(|(movies, titles, voters)| {
            if let Some(_) = titles.insert(movie.title.as_bytes(), &serialize_id(id))? {
                abort(())?;
            }
            // The suggestion casts the suggester's vote, so a vote held on
            // another movie moves here.
            if let Some(prior) = voters.insert(creator.as_bytes(), &serialize_id(id))? {
                let prior_id = deserialize_id(&prior);
                if let Some(data) = movies.get(&serialize_id(prior_id))? {
                    let mut prior_movie: Movie = bincode::deserialize(&data).unwrap();
                    prior_movie.remove_voter(creator);
                    movies.insert(
                        &serialize_id(prior_id),
                        bincode::serialize(&prior_movie).unwrap(),
                    )?;
                }
            }
            movies.insert(&serialize_id(id), bincode::serialize(&movie).unwrap())?;
            Ok(())
        }) {
            match err {
                TransactionError::Storage(e) => return Err(e),
                TransactionError::Abort(_) => return Ok(SuggestOutcome::DuplicateTitle),
            };
        }
        Ok(SuggestOutcome::Created(id))
    }

    fn get_movie(&self, id: u64) -> sled::Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        Ok(movies
            .get(serialize_id(id))?
            .map(|d| bincode::deserialize(&d).unwrap()))
    }

    fn all_movies(&self) -> sled::Result<Vec<(u64, Movie)>> {
        let movies = self.open_tree(MOVIES)?;
        let mut all = movies
            .iter()
            .map(|entry| {
                entry.map(|(id, data)| (deserialize_id(id), bincode::deserialize(&data).unwrap()))
            })
            .collect::<sled::Result<Vec<(u64, Movie)>>>()?;
        // Little-endian keys do not iterate in numeric order.
        all.sort_by_key(|(id, _)| *id);
        Ok(all)
    }

    fn movie_suggested_by(&self, user: &str) -> sled::Result<Option<(u64, Movie)>> {
        let movies = self.open_tree(MOVIES)?;
        for entry in movies.iter() {
            let (id, data) = entry?;
            let movie: Movie = bincode::deserialize(&data).unwrap();
            if movie.creator == user {
                return Ok(Some((deserialize_id(id), movie)));
            }
        }
        Ok(None)
    }

    fn active_vote_of(&self, user: &str) -> sled::Result<Option<u64>> {
        let voters = self.open_tree(MOVIES_VOTER)?;
        Ok(voters.get(user.as_bytes())?.map(deserialize_id))
    }

    fn toggle_vote(&self, id: u64, user: &str) -> sled::Result<VoteOutcome> {
        let movies = self.open_tree(MOVIES)?;
        let voters = self.open_tree(MOVIES_VOTER)?;
        let result = (&movies, &voters).transaction(|(movies, voters)| {
            let data = match movies.get(&serialize_id(id))? {
                Some(data) => data,
                None => return abort(()),
            };
            let mut target: Movie = bincode::deserialize(&data).unwrap();
            if target.has_voter(user) {
                target.remove_voter(user);
                movies.insert(&serialize_id(id), bincode::serialize(&target).unwrap())?;
                voters.remove(user.as_bytes())?;
                return Ok(VoteOutcome::Retracted);
            }
            if let Some(prior) = voters.get(user.as_bytes())? {
                let prior_id = deserialize_id(&prior);
                if let Some(data) = movies.get(&serialize_id(prior_id))? {
                    let mut prior_movie: Movie = bincode::deserialize(&data).unwrap();
                    prior_movie.remove_voter(user);
                    movies.insert(
                        &serialize_id(prior_id),
                        bincode::serialize(&prior_movie).unwrap(),
                    )?;
                }
            }
            target.add_voter(user);
            movies.insert(&serialize_id(id), bincode::serialize(&target).unwrap())?;
            voters.insert(user.as_bytes(), &serialize_id(id))?;
            Ok(VoteOutcome::Cast)
        });
        match result {
            Ok(outcome) => Ok(outcome),
            Err(TransactionError::Storage(e)) => Err(e),
            Err(TransactionError::Abort(())) => Ok(VoteOutcome::NotFound),
        }
    }

    fn remove_movie(&self, id: u64, user: &str) -> sled::Result<DeleteOutcome> {
        let movies = self.open_tree(MOVIES)?;
        let titles = self.open_tree(MOVIES_TITLE)?;
        let voters = self.open_tree(MOVIES_VOTER)?;
        let result = (&movies, &titles, &voters).transaction(|(movies, titles, voters)| {
            let data = match movies.remove(&serialize_id(id))? {
                Some(data) => data,
                None => return abort(DeleteAbort::NotFound),
            };
            let movie: Movie = bincode::deserialize(&data).unwrap();
            if movie.creator != user {
                // Aborting rolls the removal back.
                return abort(DeleteAbort::NotCreator);
            }
            titles.remove(movie.title.as_bytes())?;
            for voter in &movie.voters {
                if let Some(active) = voters.get(voter.as_bytes())? {
                    if deserialize_id(active) == id {
                        voters.remove(voter.as_bytes())?;
                    }
                }
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(TransactionError::Storage(e)) => Err(e),
            Err(TransactionError::Abort(DeleteAbort::NotFound)) => Ok(DeleteOutcome::NotFound),
            Err(TransactionError::Abort(DeleteAbort::NotCreator)) => Ok(DeleteOutcome::NotCreator),
        }
    }
}
