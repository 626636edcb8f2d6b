//! Обещания движка: разделяемое будущее с наблюдаемым состоянием.
//!
//! `Promise` можно клонировать и ожидать из нескольких мест, а его
//! состояние можно прочитать синхронно, ничего не опрашивая. Это нужно
//! синхронному обходу графа при инстанцировании: он только смотрит на
//! уже завершённые обещания и никогда не ждёт.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};

/// Состояние обещания.
#[derive(Debug, PartialEq)]
pub enum PromiseState<'a, T, E> {
    Pending,
    Fulfilled(&'a T),
    Rejected(&'a E),
}

/// Обещание со значением `T` или причиной отказа `E`.
pub struct Promise<T, E> {
    inner: Shared<LocalBoxFuture<'static, Result<T, E>>>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Обернуть будущее. Оно начнёт выполняться при первом опросе.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
    {
        Self {
            inner: future.boxed_local().shared(),
        }
    }

    /// Уже выполненное обещание.
    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Уже отклонённое обещание.
    pub fn rejected(reason: E) -> Self {
        Self::settled(Err(reason))
    }

    /// Обещание, которое никогда не завершится.
    pub fn pending() -> Self {
        Self::new(future::pending())
    }

    fn settled(result: Result<T, E>) -> Self {
        let promise = Self::new(future::ready(result));
        // Готовое будущее завершается за один опрос, результат остаётся в Shared.
        let _ = promise.inner.clone().now_or_never();
        promise
    }

    /// Текущее состояние без опроса.
    pub fn state(&self) -> PromiseState<'_, T, E> {
        match self.inner.peek() {
            None => PromiseState::Pending,
            Some(Ok(value)) => PromiseState::Fulfilled(value),
            Some(Err(reason)) => PromiseState::Rejected(reason),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// Одно и то же обещание (а не равные значения).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Shared::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_tuple("Promise").field(&state).finish()
    }
}
