use crate::models::Note;

/// In-memory collection of the signed-in user's notes, replaced wholesale on
/// each fetch and patched locally after confirmed mutations.
#[derive(Debug, Default)]
pub struct NoteCache {
    notes: Vec<Note>,
}

impl NoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, notes: Vec<Note>) {
        self.notes = notes;
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub fn insert(&mut self, note: Note) {
        self.notes.push(note);
    }

    /// Replaces the cached note with the same id. Returns false when the id
    /// is not cached, in which case nothing changes.
    pub fn apply_update(&mut self, note: Note) -> bool {
        match self.notes.iter_mut().find(|cached| cached.id == note.id) {
            Some(cached) => {
                *cached = note;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.notes.len();
        self.notes.retain(|note| note.id != id);
        self.notes.len() != before
    }

    /// Filtered view of the cache. The search term matches title or content
    /// case-insensitively; the tag must match one of the note's tags exactly.
    /// The cache itself is never mutated by filtering.
    pub fn filtered(&self, search_term: &str, selected_tag: Option<&str>) -> Vec<Note> {
        let needle = search_term.to_lowercase();
        self.notes
            .iter()
            .filter(|note| {
                let matches_text = note.title.to_lowercase().contains(&needle)
                    || note.content.to_lowercase().contains(&needle);
                let matches_tag = selected_tag
                    .map(|tag| note.tags.iter().any(|candidate| candidate == tag))
                    .unwrap_or(true);
                matches_text && matches_tag
            })
            .cloned()
            .collect()
    }

    /// Every distinct tag across the cache, in first-seen order.
    pub fn tag_universe(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for note in &self.notes {
            for tag in &note.tags {
                if !seen.iter().any(|existing| existing == tag) {
                    seen.push(tag.clone());
                }
            }
        }
        seen
    }
}

/// Splits the comma-separated tag field used by the edit endpoint back into
/// a tag list, dropping empty entries.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{split_tags, NoteCache};
    use crate::models::Note;

    fn note(id: &str, title: &str, content: &str, tags: &[&str]) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(ToString::to_string).collect(),
            created_at: None,
            images: Vec::new(),
        }
    }

    fn seeded() -> NoteCache {
        let mut cache = NoteCache::new();
        cache.replace_all(vec![
            note("1", "Shopping list", "milk and eggs", &["home"]),
            note("2", "Work notes", "standup agenda", &["work"]),
            note("3", "Workout plan", "tuesday legs", &["home", "health"]),
        ]);
        cache
    }

    #[test]
    fn empty_filter_returns_everything() {
        let cache = seeded();
        let filtered = cache.filtered("", None);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered, cache.notes().to_vec());
    }

    #[test]
    fn filtering_is_idempotent() {
        let cache = seeded();
        let once = cache.filtered("work", None);
        let twice = cache.filtered("work", None);
        assert_eq!(once, twice);
    }

    #[test]
    fn search_matches_title_and_content_case_insensitively() {
        let cache = seeded();

        let by_title = cache.filtered("WORK", None);
        assert_eq!(by_title.len(), 2);

        let by_content = cache.filtered("standup", None);
        assert_eq!(by_content.len(), 1);
        assert_eq!(by_content[0].id, "2");
    }

    #[test]
    fn work_search_returns_only_matching_notes() {
        let mut cache = NoteCache::new();
        cache.replace_all(vec![
            note("1", "Shopping list", "", &[]),
            note("2", "Work notes", "", &[]),
        ]);

        let filtered = cache.filtered("work", None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "Work notes");
    }

    #[test]
    fn tag_filter_requires_exact_membership() {
        let mut cache = NoteCache::new();
        cache.replace_all(vec![
            note("1", "a", "", &["home"]),
            note("2", "b", "", &["homework"]),
        ]);

        let filtered = cache.filtered("", Some("home"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "1");
    }

    #[test]
    fn search_and_tag_combine_as_and() {
        let cache = seeded();
        let filtered = cache.filtered("work", Some("home"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "3");
    }

    #[test]
    fn tag_universe_is_the_exact_union_in_first_seen_order() {
        let cache = seeded();
        assert_eq!(cache.tag_universe(), vec!["home", "work", "health"]);
    }

    #[test]
    fn tag_universe_deduplicates() {
        let mut cache = NoteCache::new();
        cache.replace_all(vec![
            note("1", "a", "", &["x", "y"]),
            note("2", "b", "", &["y", "x"]),
        ]);
        assert_eq!(cache.tag_universe(), vec!["x", "y"]);
    }

    #[test]
    fn remove_only_touches_the_matching_note() {
        let mut cache = seeded();
        assert!(cache.remove("2"));
        assert_eq!(cache.notes().len(), 2);
        assert!(cache.get("2").is_none());

        assert!(!cache.remove("99"));
        assert_eq!(cache.notes().len(), 2);
    }

    #[test]
    fn apply_update_replaces_in_place() {
        let mut cache = seeded();
        let updated = note("2", "Work notes v2", "new agenda", &["work", "urgent"]);
        assert!(cache.apply_update(updated));

        assert_eq!(cache.notes()[1].title, "Work notes v2");
        assert_eq!(cache.notes()[1].tags, vec!["work", "urgent"]);

        let unknown = note("99", "ghost", "", &[]);
        assert!(!cache.apply_update(unknown));
        assert_eq!(cache.notes().len(), 3);
    }

    #[test]
    fn insert_appends() {
        let mut cache = seeded();
        cache.insert(note("4", "New", "", &[]));
        assert_eq!(cache.notes().last().map(|n| n.id.as_str()), Some("4"));
    }

    #[test]
    fn split_tags_trims_and_drops_empties() {
        assert_eq!(split_tags("work, home , ,urgent"), vec!["work", "home", "urgent"]);
        assert!(split_tags("").is_empty());
        assert!(split_tags(" , ").is_empty());
    }
}
