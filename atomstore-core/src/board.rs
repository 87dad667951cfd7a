//! Board Application State
//!
//! The state of a small message board: a text field, a live preview of that
//! text, and a list of posts. Each component only talks to the store; none
//! of them knows the others exist.
//!
//! | component        | reads        | writes  |
//! |------------------|--------------|---------|
//! | `TextInput`      |              | `text`  |
//! | `TextDisplay`    | `text`       |         |
//! | `CharacterCount` | `char_count` |         |
//! | `PostList`       | `posts`      | `posts` |
//! | `PostCount`      | `post_count` |         |

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reactive::{Atom, Reader, ReaderBinding, Selector, Store, Writer, WriterBinding};

pub const TEXT_KEY: &str = "text";
pub const POSTS_KEY: &str = "posts";

/// One entry of the post list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author: String,
    pub content: String,
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.id, self.author, self.content)
    }
}

/// The fixed set of atoms and selectors the board runs on.
#[derive(Debug, Clone, Copy)]
pub struct BoardState {
    pub text: Atom<String>,
    pub char_count: Selector<usize>,
    pub posts: Atom<Vec<Post>>,
    pub post_count: Selector<usize>,
}

impl BoardState {
    /// Register the board's atoms and selectors. Call once per store.
    pub fn install(store: &Store) -> Result<Self> {
        let text = store.create_atom_with_key(TEXT_KEY, String::new())?;
        let char_count = store.map(&text, |text: &String| text.chars().count())?;
        let posts = store.create_atom_with_key(POSTS_KEY, Vec::<Post>::new())?;
        let post_count = store.map(&posts, |posts: &Vec<Post>| posts.len())?;
        tracing::debug!(nodes = store.len(), "board state installed");
        Ok(Self {
            text,
            char_count,
            posts,
            post_count,
        })
    }
}

/// What a display component currently shows, and how often it re-rendered.
#[derive(Debug)]
struct View<T> {
    content: Arc<Mutex<T>>,
    renders: Arc<AtomicUsize>,
}

impl<T: Clone + Send + 'static> View<T> {
    fn new(initial: T) -> Self {
        Self {
            content: Arc::new(Mutex::new(initial)),
            renders: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Observer callback that re-renders this view from a new value.
    fn renderer<V, F>(&self, render: F) -> impl Fn(&V) + Send + Sync + 'static
    where
        V: ?Sized + 'static,
        F: Fn(&V) -> T + Send + Sync + 'static,
    {
        let content = Arc::clone(&self.content);
        let renders = Arc::clone(&self.renders);
        move |value: &V| {
            *content.lock() = render(value);
            renders.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Initial render at mount time. Not counted as a re-render.
    fn mount(&self, content: T) {
        *self.content.lock() = content;
    }

    fn snapshot(&self) -> T {
        self.content.lock().clone()
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

/// Producer: edits the text atom.
#[derive(Debug)]
pub struct TextInput {
    writer: WriterBinding<String>,
}

impl TextInput {
    pub fn mount(store: &Store, state: &BoardState) -> Result<Self> {
        Ok(Self {
            writer: store.bind_writer(&state.text)?,
        })
    }

    pub fn type_text(&self, text: impl Into<String>) -> Result<()> {
        self.writer.set(text.into())
    }

    pub fn clear(&self) -> Result<()> {
        self.writer.set(String::new())
    }
}

impl Writer for TextInput {
    type Target = String;

    fn writer(&self) -> &WriterBinding<String> {
        &self.writer
    }
}

/// Display: echoes the text atom.
#[derive(Debug)]
pub struct TextDisplay {
    reader: ReaderBinding<Atom<String>>,
    view: View<String>,
}

impl TextDisplay {
    pub fn mount(store: &Store, state: &BoardState) -> Result<Self> {
        let view = View::new(String::new());
        let (current, reader) = store.bind_reader(&state.text, view.renderer(String::clone))?;
        view.mount(current);
        Ok(Self { reader, view })
    }

    pub fn rendered(&self) -> String {
        self.view.snapshot()
    }

    pub fn renders(&self) -> usize {
        self.view.renders()
    }
}

impl Reader for TextDisplay {
    type Source = Atom<String>;

    fn reader(&self) -> &ReaderBinding<Atom<String>> {
        &self.reader
    }
}

/// Display: length of the text in characters, from the `char_count` selector.
#[derive(Debug)]
pub struct CharacterCount {
    reader: ReaderBinding<Selector<usize>>,
    view: View<usize>,
}

impl CharacterCount {
    pub fn mount(store: &Store, state: &BoardState) -> Result<Self> {
        let view = View::new(0);
        let (current, reader) = store.bind_reader(&state.char_count, view.renderer(|n: &usize| *n))?;
        view.mount(current);
        Ok(Self { reader, view })
    }

    pub fn rendered(&self) -> usize {
        self.view.snapshot()
    }

    pub fn renders(&self) -> usize {
        self.view.renders()
    }
}

impl Reader for CharacterCount {
    type Source = Selector<usize>;

    fn reader(&self) -> &ReaderBinding<Selector<usize>> {
        &self.reader
    }
}

/// Display: number of posts, from the `post_count` selector.
#[derive(Debug)]
pub struct PostCount {
    reader: ReaderBinding<Selector<usize>>,
    view: View<usize>,
}

impl PostCount {
    pub fn mount(store: &Store, state: &BoardState) -> Result<Self> {
        let view = View::new(0);
        let (current, reader) = store.bind_reader(&state.post_count, view.renderer(|n: &usize| *n))?;
        view.mount(current);
        Ok(Self { reader, view })
    }

    pub fn rendered(&self) -> usize {
        self.view.snapshot()
    }

    pub fn renders(&self) -> usize {
        self.view.renders()
    }
}

impl Reader for PostCount {
    type Source = Selector<usize>;

    fn reader(&self) -> &ReaderBinding<Selector<usize>> {
        &self.reader
    }
}

/// Editable list: shows every post, in insertion order, and adds new ones.
#[derive(Debug)]
pub struct PostList {
    reader: ReaderBinding<Atom<Vec<Post>>>,
    writer: WriterBinding<Vec<Post>>,
    view: View<Vec<String>>,
}

fn render_posts(posts: &Vec<Post>) -> Vec<String> {
    posts.iter().map(Post::to_string).collect()
}

impl PostList {
    pub fn mount(store: &Store, state: &BoardState) -> Result<Self> {
        let view = View::new(Vec::new());
        let (current, reader) = store.bind_reader(&state.posts, view.renderer(render_posts))?;
        view.mount(render_posts(&current));
        let writer = store.bind_writer(&state.posts)?;
        Ok(Self {
            reader,
            writer,
            view,
        })
    }

    /// Append a post with the next free id and return it.
    pub fn add_post(&self, author: impl Into<String>, content: impl Into<String>) -> Result<Post> {
        // Reading the last id and appending must not interleave with
        // another writer.
        let _serial = self.writer.store().lock();
        let posts = self.reader.current()?;
        let post = Post {
            id: posts.last().map_or(1, |last| last.id + 1),
            author: author.into(),
            content: content.into(),
        };
        self.writer.append(post.clone())?;
        Ok(post)
    }

    pub fn rendered(&self) -> Vec<String> {
        self.view.snapshot()
    }

    pub fn renders(&self) -> usize {
        self.view.renders()
    }
}

impl Reader for PostList {
    type Source = Atom<Vec<Post>>;

    fn reader(&self) -> &ReaderBinding<Atom<Vec<Post>>> {
        &self.reader
    }
}

impl Writer for PostList {
    type Target = Vec<Post>;

    fn writer(&self) -> &WriterBinding<Vec<Post>> {
        &self.writer
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
